//! Deterministic object names and encryption material.
//!
//! Both are pure functions of an [`ObjectIdentity`] (plus the process-wide
//! salt for key material). Nothing derived here is ever stored: recomputing
//! it is how the same object is found and decrypted again.
//!
//! The formulas below are version `V1`. Changing any of them orphans every
//! object written under the previous version.

use std::fmt;

use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::identity::ObjectIdentity;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

/// Suffix of every stored object.
pub const OBJECT_SUFFIX: &str = ".enc";

/// Lowercase hex SHA-512 of `input`.
fn sha512_hex(input: impl AsRef<[u8]>) -> String {
    hex::encode(Sha512::digest(input.as_ref()))
}

/// Visibility segment embedded in the object name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishState {
    /// Object is still being written and must not be read.
    Staging,
    /// Object is complete and readable.
    Published,
}

impl PublishState {
    pub fn as_digit(self) -> char {
        match self {
            PublishState::Staging => '0',
            PublishState::Published => '1',
        }
    }
}

/// Name of an object in the store.
///
/// Grammar: `[<namespace>_]<tier:0|1>_<state:0|1>_<sha512 hex>.enc`, where the
/// digest covers `<attachment_id>/<channel_id>/<guild_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectName(String);

impl ObjectName {
    pub fn derive(identity: &ObjectIdentity, state: PublishState) -> Self {
        let mut name = Self::stem(identity, state);
        name.push_str(OBJECT_SUFFIX);
        ObjectName(name)
    }

    fn stem(identity: &ObjectIdentity, state: PublishState) -> String {
        let digest = Self::content_digest(identity);
        let mut name = String::with_capacity(digest.len() + 32);
        if let Some(namespace) = &identity.namespace {
            name.push_str(namespace);
            name.push('_');
        }
        name.push(identity.tier.as_digit());
        name.push('_');
        name.push(state.as_digit());
        name.push('_');
        name.push_str(&digest);
        name
    }

    /// Name readers look up.
    pub fn published(identity: &ObjectIdentity) -> Self {
        Self::derive(identity, PublishState::Published)
    }

    /// Name one write streams into before publishing. `write_id` keeps
    /// concurrent writers of the same identity apart.
    pub fn staging(identity: &ObjectIdentity, write_id: &str) -> Self {
        let mut name = Self::stem(identity, PublishState::Staging);
        name.push('.');
        name.push_str(write_id);
        name.push_str(OBJECT_SUFFIX);
        ObjectName(name)
    }

    /// Hex digest identifying the attachment, independent of tier, state and
    /// namespace.
    pub fn content_digest(identity: &ObjectIdentity) -> String {
        sha512_hex(format!(
            "{}/{}/{}",
            identity.attachment_id, identity.channel_id, identity.guild_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ObjectName> for String {
    fn from(value: ObjectName) -> Self {
        value.0
    }
}

/// AES-256-CBC key and IV for one object.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionMaterial {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl EncryptionMaterial {
    pub fn from_parts(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }
}

impl fmt::Debug for EncryptionMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionMaterial")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

/// Derives per-object encryption material from an identity and a fixed salt.
#[derive(Clone)]
pub struct KeyDeriver {
    salt: Zeroizing<String>,
}

impl KeyDeriver {
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: Zeroizing::new(salt.into()),
        }
    }

    /// Two-stage derivation. The outer digest's hex rendering is truncated,
    /// so key and IV bytes are ASCII hex characters.
    ///
    /// - key: `sha512(sha512(guild‖channel‖attachment‖size) ‖ salt)[..32]`
    /// - iv:  `sha512(sha512(guild‖channel‖attachment) ‖ size)[..16]`
    pub fn material(&self, identity: &ObjectIdentity) -> EncryptionMaterial {
        let ids = Zeroizing::new(format!(
            "{}{}{}",
            identity.guild_id, identity.channel_id, identity.attachment_id
        ));

        let inner_key = Zeroizing::new(sha512_hex(format!("{}{}", *ids, identity.file_size)));
        let outer_key = Zeroizing::new(sha512_hex(format!("{}{}", *inner_key, *self.salt)));

        let inner_iv = Zeroizing::new(sha512_hex(ids.as_bytes()));
        let outer_iv = Zeroizing::new(sha512_hex(format!("{}{}", *inner_iv, identity.file_size)));

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&outer_key.as_bytes()[..KEY_LEN]);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&outer_iv.as_bytes()[..IV_LEN]);

        EncryptionMaterial { key, iv }
    }
}

impl fmt::Debug for KeyDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDeriver")
            .field("salt", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TierFlag;
    use std::collections::HashSet;

    fn identity() -> ObjectIdentity {
        ObjectIdentity::new("813224870125387798", "813224870125387801", "1099887766554433", 4096)
    }

    #[test]
    fn name_follows_grammar() {
        let id = identity();
        let name = ObjectName::published(&id);
        let digest = ObjectName::content_digest(&id);

        assert_eq!(digest.len(), 128);
        assert_eq!(name.as_str(), format!("0_1_{digest}.enc"));

        let premium = id.clone().with_tier(TierFlag::Premium).with_namespace("avatars");
        assert_eq!(
            ObjectName::derive(&premium, PublishState::Staging).as_str(),
            format!("avatars_1_0_{digest}.enc")
        );
        assert_eq!(
            ObjectName::staging(&premium, "w1").as_str(),
            format!("avatars_1_0_{digest}.w1.enc")
        );
        assert_ne!(
            ObjectName::staging(&premium, "w1"),
            ObjectName::staging(&premium, "w2")
        );
    }

    #[test]
    fn digest_covers_ids_in_order() {
        let id = identity();
        let expected = sha512_hex("1099887766554433/813224870125387801/813224870125387798");
        assert_eq!(ObjectName::content_digest(&id), expected);
    }

    #[test]
    fn derivation_is_pure() {
        let deriver = KeyDeriver::new("pepper");
        let a = identity();
        let b = identity();

        for _ in 0..8 {
            assert_eq!(ObjectName::published(&a), ObjectName::published(&b));
            assert_eq!(deriver.material(&a), deriver.material(&b));
        }
        assert_eq!(
            deriver.material(&a),
            KeyDeriver::new("pepper").material(&a)
        );
    }

    #[test]
    fn material_matches_formula() {
        let deriver = KeyDeriver::new("pepper");
        let id = identity();
        let ids = "8132248701253877988132248701253878011099887766554433";

        let key = sha512_hex(format!("{}pepper", sha512_hex(format!("{ids}4096"))));
        let iv = sha512_hex(format!("{}4096", sha512_hex(ids)));

        let material = deriver.material(&id);
        assert_eq!(material.key(), &key.as_bytes()[..KEY_LEN]);
        assert_eq!(material.iv(), &iv.as_bytes()[..IV_LEN]);
    }

    #[test]
    fn single_field_changes_alter_name() {
        let base = identity();
        let base_name = ObjectName::published(&base);

        let variants = [
            ObjectIdentity {
                guild_id: "1".into(),
                ..base.clone()
            },
            ObjectIdentity {
                channel_id: "1".into(),
                ..base.clone()
            },
            ObjectIdentity {
                attachment_id: "1".into(),
                ..base.clone()
            },
            base.clone().with_tier(TierFlag::Premium),
            base.clone().with_namespace("ns"),
        ];

        for variant in &variants {
            assert_ne!(ObjectName::published(variant), base_name, "{variant:?}");
        }
    }

    #[test]
    fn size_and_salt_change_material_but_not_name() {
        let deriver = KeyDeriver::new("pepper");
        let base = identity();
        let resized = ObjectIdentity {
            file_size: base.file_size + 1,
            ..base.clone()
        };

        assert_eq!(ObjectName::published(&base), ObjectName::published(&resized));

        let a = deriver.material(&base);
        let b = deriver.material(&resized);
        assert_ne!(a.key(), b.key());
        assert_ne!(a.iv(), b.iv());

        let other_salt = KeyDeriver::new("salt").material(&base);
        assert_ne!(a.key(), other_salt.key());
        assert_eq!(a.iv(), other_salt.iv());
    }

    #[test]
    fn sampled_names_do_not_collide() {
        let mut names = HashSet::new();
        for i in 0..1_000u64 {
            let by_attachment = ObjectIdentity::new("guild", "channel", i.to_string(), 1);
            let by_channel = ObjectIdentity::new("guild", i.to_string(), "attachment", 1);
            let by_guild = ObjectIdentity::new(i.to_string(), "channel", "attachment", 1);
            assert!(names.insert(ObjectName::published(&by_attachment)));
            assert!(names.insert(ObjectName::published(&by_channel)));
            assert!(names.insert(ObjectName::published(&by_guild)));
        }
    }

    #[test]
    fn debug_output_hides_secrets() {
        let deriver = KeyDeriver::new("pepper");
        let rendered = format!("{deriver:?} {:?}", deriver.material(&identity()));
        assert!(!rendered.contains("pepper"));
        assert!(rendered.contains("<redacted>"));
    }
}
