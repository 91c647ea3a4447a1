//! Versioned guide blobs, compressed by default, optionally sealed.
//!
//! Layout: `MIMC`, format version (u16 LE), flags, body. Flag bit 0 marks a
//! sealed body, bit 1 a zstd-compressed one. The guide JSON is compressed
//! first and sealed second. A sealed body is `nonce[12] || ciphertext`,
//! where the ciphertext carries its own 16 byte ChaCha20-Poly1305 tag.

use crate::errors::MimicError;
use crate::guide::Guide;
use crate::runtime::FileSystem;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MAGIC: &[u8; 4] = b"MIMC";
pub const FORMAT_VERSION: u16 = 1;
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const FLAG_SEALED: u8 = 0b0000_0001;
const FLAG_COMPRESSED: u8 = 0b0000_0010;
const KNOWN_FLAGS: u8 = FLAG_SEALED | FLAG_COMPRESSED;
const HEADER_LEN: usize = 7;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Keyed stage derived from a passphrase.
#[derive(Clone)]
pub struct Seal {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for Seal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Seal(..)")
    }
}

impl Seal {
    /// The key is the SHA-256 digest of the passphrase.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, MimicError> {
        if passphrase.is_empty() {
            return Err(MimicError::InvalidParameter(
                "passphrase must not be empty".to_string(),
            ));
        }
        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| MimicError::InvalidParameter(format!("seal key: {e}")))?;
        Ok(Self { cipher })
    }

    fn seal(&self, plain: &[u8], rng: &mut dyn RngCore) -> Result<Vec<u8>, MimicError> {
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        let cipher = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plain)
            .map_err(|_| MimicError::InvalidParameter("guide is too large to seal".to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + cipher.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&cipher);
        Ok(out)
    }

    fn open(&self, body: &[u8]) -> Result<Vec<u8>, MimicError> {
        if body.len() < NONCE_LEN + TAG_LEN {
            return Err(MimicError::Decode("sealed body is truncated".to_string()));
        }
        let (nonce, cipher) = body.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), cipher)
            .map_err(|_| {
                MimicError::Decrypt(
                    "authentication failed: wrong passphrase or tampered blob".to_string(),
                )
            })
    }
}

#[derive(Debug, Clone)]
pub struct GuideCodec {
    seal: Option<Seal>,
    /// zstd level for new blobs; `None` writes the JSON as is.
    compression: Option<i32>,
}

impl Default for GuideCodec {
    fn default() -> Self {
        Self {
            seal: None,
            compression: Some(DEFAULT_COMPRESSION_LEVEL),
        }
    }
}

impl GuideCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sealed(seal: Seal) -> Self {
        Self {
            seal: Some(seal),
            ..Self::default()
        }
    }

    pub fn with_compression(mut self, level: Option<i32>) -> Self {
        self.compression = level;
        self
    }

    pub fn is_sealed(&self) -> bool {
        self.seal.is_some()
    }

    pub fn encode(&self, guide: &Guide, rng: &mut dyn RngCore) -> Result<Vec<u8>, MimicError> {
        let mut flags = 0;
        let mut body = serde_json::to_vec(guide).map_err(|e| MimicError::Io(e.to_string()))?;
        if let Some(level) = self.compression {
            body = zstd::encode_all(body.as_slice(), level)
                .map_err(|e| MimicError::Io(format!("compress guide: {e}")))?;
            flags |= FLAG_COMPRESSED;
        }
        if let Some(seal) = &self.seal {
            body = seal.seal(&body, rng)?;
            flags |= FLAG_SEALED;
        }
        let mut blob = Vec::with_capacity(HEADER_LEN + body.len());
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        blob.push(flags);
        blob.extend_from_slice(&body);
        Ok(blob)
    }

    /// Malformed blobs fail with `Decode`; a missing or wrong key on a
    /// sealed blob fails with `Decrypt`. Plain blobs decode with or without
    /// a seal configured, and compressed or not regardless of the codec's
    /// own compression setting.
    pub fn decode(&self, blob: &[u8]) -> Result<Guide, MimicError> {
        if blob.len() < HEADER_LEN {
            return Err(MimicError::Decode(format!(
                "blob is {} bytes, shorter than the header",
                blob.len()
            )));
        }
        if &blob[..4] != MAGIC {
            return Err(MimicError::Decode("not a guide blob".to_string()));
        }
        let version = u16::from_le_bytes([blob[4], blob[5]]);
        if version != FORMAT_VERSION {
            return Err(MimicError::Decode(format!(
                "unsupported format version {version}"
            )));
        }
        let flags = blob[6];
        if flags & !KNOWN_FLAGS != 0 {
            return Err(MimicError::Decode(format!("unknown flags {flags:#04x}")));
        }
        let mut body = blob[HEADER_LEN..].to_vec();
        if flags & FLAG_SEALED != 0 {
            let seal = self.seal.as_ref().ok_or_else(|| {
                MimicError::Decrypt("blob is sealed and no passphrase was given".to_string())
            })?;
            body = seal.open(&body)?;
        }
        if flags & FLAG_COMPRESSED != 0 {
            body = zstd::decode_all(body.as_slice())
                .map_err(|e| MimicError::Decode(format!("corrupt compressed body: {e}")))?;
        }
        let guide: Guide =
            serde_json::from_slice(&body).map_err(|e| MimicError::Decode(e.to_string()))?;
        for name in guide.scenario_names() {
            if let Some(scenario) = guide.scenario(&name) {
                scenario
                    .validate()
                    .map_err(|e| MimicError::Decode(format!("scenario `{name}`: {e}")))?;
            }
        }
        Ok(guide)
    }
}

/// Saves and restores guides through a [`FileSystem`].
pub struct GuideStore {
    fs: Arc<dyn FileSystem>,
    codec: GuideCodec,
}

impl GuideStore {
    pub fn new(fs: Arc<dyn FileSystem>, codec: GuideCodec) -> Self {
        Self { fs, codec }
    }

    /// Writes beside `path` and renames over it, so a crash never leaves a
    /// half-written guide.
    pub fn save(&self, guide: &Guide, path: &Path, rng: &mut dyn RngCore) -> Result<(), MimicError> {
        let blob = self.codec.encode(guide, rng)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.fs.create_dir_all(parent)?;
        }
        let staging = staging_path(path);
        self.fs.write(&staging, &blob)?;
        self.fs.rename(&staging, path)
    }

    pub fn load(&self, path: &Path) -> Result<Guide, MimicError> {
        let blob = self.fs.read(path)?;
        self.codec.decode(&blob)
    }

    /// Replaces `guide`'s contents only after the whole blob decodes;
    /// on error `guide` is untouched. Registered transforms are kept.
    pub fn load_into(&self, guide: &mut Guide, path: &Path) -> Result<(), MimicError> {
        let loaded = self.load(path)?;
        guide.install(loaded);
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Button, Event, Key, Point, Target};
    use crate::runtime::FakeFileSystem;
    use crate::scenario::Scenario;
    use crate::sequence::Sequence;
    use crate::transform::TransformSpec;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_guide() -> Guide {
        let mut guide = Guide::new();
        let mut login = Sequence::from_events(vec![
            Event::click_to(5, 200_000_000, 40_000_000, Target::Point(Point::new(10, 20)), Button::Left),
            Event::text_entry(100, "hunter2", 12.5),
            Event::key_press(1, Key::Char('\u{e9}')),
        ]);
        login
            .schedule_transform(TransformSpec::TimeDilation { factor: 1.5 })
            .expect("schedule");
        guide.insert_sequence("login", login).expect("insert");
        guide
            .insert_scenario("main", Scenario::parse("log.*").expect("parse"))
            .expect("insert");
        guide
            .schedule_transform(TransformSpec::TimeNoise {
                variance: 0.2,
                mode: Default::default(),
            })
            .expect("schedule");
        guide
    }

    fn seal(passphrase: &str) -> Seal {
        Seal::from_passphrase(passphrase).expect("seal")
    }

    #[test]
    fn plain_and_sealed_blobs_round_trip() {
        let guide = sample_guide();
        let mut rng = ChaCha8Rng::seed_from_u64(4);

        let plain = GuideCodec::new();
        let blob = plain.encode(&guide, &mut rng).expect("encode");
        assert_eq!(&blob[..4], MAGIC);
        assert_eq!(plain.decode(&blob).expect("decode"), guide);

        let sealed = GuideCodec::sealed(seal("correct horse"));
        let blob = sealed.encode(&guide, &mut rng).expect("encode");
        assert_eq!(blob[6], FLAG_SEALED | FLAG_COMPRESSED);
        assert!(!blob.windows(5).any(|w| w == b"login"));
        assert_eq!(sealed.decode(&blob).expect("decode"), guide);
    }

    #[test]
    fn wrong_or_missing_key_is_a_decrypt_error() {
        let guide = sample_guide();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let blob = GuideCodec::sealed(seal("right"))
            .encode(&guide, &mut rng)
            .expect("encode");
        assert!(matches!(
            GuideCodec::sealed(seal("wrong")).decode(&blob),
            Err(MimicError::Decrypt(_))
        ));
        assert!(matches!(
            GuideCodec::new().decode(&blob),
            Err(MimicError::Decrypt(_))
        ));
    }

    #[test]
    fn plain_blob_is_accepted_with_a_key_configured() {
        let guide = sample_guide();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let blob = GuideCodec::new().encode(&guide, &mut rng).expect("encode");
        assert_eq!(
            GuideCodec::sealed(seal("unused")).decode(&blob).expect("decode"),
            guide
        );
    }

    #[test]
    fn corrupt_blobs_are_decode_errors() {
        let codec = GuideCodec::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let blob = codec.encode(&sample_guide(), &mut rng).expect("encode");

        assert!(matches!(codec.decode(&blob[..3]), Err(MimicError::Decode(_))));
        assert!(matches!(
            codec.decode(&blob[..blob.len() - 10]),
            Err(MimicError::Decode(_))
        ));
        let mut bad_magic = blob.clone();
        bad_magic[0] = b'X';
        assert!(matches!(codec.decode(&bad_magic), Err(MimicError::Decode(_))));
        let mut bad_version = blob.clone();
        bad_version[4] = 2;
        assert!(matches!(codec.decode(&bad_version), Err(MimicError::Decode(_))));
        let mut bad_flags = blob;
        bad_flags[6] = 0x80;
        assert!(matches!(codec.decode(&bad_flags), Err(MimicError::Decode(_))));
    }

    #[test]
    fn store_saves_atomically_and_load_into_is_all_or_nothing() {
        let fs = FakeFileSystem::default();
        let store = GuideStore::new(Arc::new(fs.clone()), GuideCodec::new());
        let path = Path::new("/guides/app.guide");
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        store.save(&sample_guide(), path, &mut rng).expect("save");
        assert!(fs.exists(path));
        assert!(!fs.exists(Path::new("/guides/app.guide.tmp")));

        let mut target = Guide::new();
        store.load_into(&mut target, path).expect("load");
        assert_eq!(target, sample_guide());

        fs.write(Path::new("/guides/broken.guide"), b"MIMC\x01\x00\x00{not json")
            .expect("write");
        let before = target.clone();
        assert!(matches!(
            store.load_into(&mut target, Path::new("/guides/broken.guide")),
            Err(MimicError::Decode(_))
        ));
        assert_eq!(target, before);
    }

    #[test]
    fn compression_is_flagged_and_optional() {
        let guide = sample_guide();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let compressed = GuideCodec::new().encode(&guide, &mut rng).expect("encode");
        assert_eq!(compressed[6], FLAG_COMPRESSED);
        let raw = GuideCodec::new()
            .with_compression(None)
            .encode(&guide, &mut rng)
            .expect("encode");
        assert_eq!(raw[6], 0);
        assert!(raw.windows(5).any(|w| w == b"login"));

        let reader = GuideCodec::new().with_compression(None);
        assert_eq!(reader.decode(&compressed).expect("decode"), guide);
        assert_eq!(GuideCodec::new().decode(&raw).expect("decode"), guide);
    }

    #[test]
    fn corrupt_compressed_stream_is_a_decode_error() {
        let codec = GuideCodec::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut blob = codec.encode(&sample_guide(), &mut rng).expect("encode");
        for byte in &mut blob[HEADER_LEN..HEADER_LEN + 8] {
            *byte ^= 0xff;
        }
        assert!(matches!(codec.decode(&blob), Err(MimicError::Decode(_))));

        let mut not_zstd = blob[..HEADER_LEN].to_vec();
        not_zstd.extend_from_slice(b"{\"sequences\":{}}");
        assert!(matches!(codec.decode(&not_zstd), Err(MimicError::Decode(_))));
    }

    #[test]
    fn tampered_sealed_body_is_a_decrypt_error() {
        let codec = GuideCodec::sealed(seal("pass"));
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut blob = codec.encode(&sample_guide(), &mut rng).expect("encode");
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(codec.decode(&blob), Err(MimicError::Decrypt(_))));
        assert!(matches!(
            codec.decode(&blob[..HEADER_LEN + NONCE_LEN]),
            Err(MimicError::Decode(_))
        ));
    }
}
