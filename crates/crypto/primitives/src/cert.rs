//! Vote signing and certificates over block hashes.
//!
//! A vote carries a `PartCert`: one replica's ed25519 signature over the
//! block hash it endorses. The proposer accumulates partials into a
//! `QuorumCert`; `compute` seals the aggregation once n - f distinct
//! partials are in. Signing takes a block hash directly and verification
//! resolves voters through the replica table, so raw key and signature
//! bytes are only ever handled at certificate construction, where their
//! length bounds are enforced.

use arbor_types::{PublicKey, ReplicaConfig, ReplicaId, WireError, WireReader, WireWriter, H256};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use std::collections::BTreeMap;
use thiserror::Error;

pub const SIGNATURE_BYTES: usize = 64;
const KEY_BYTES: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CertError {
    #[error("voter {0} is not in the replica table")]
    UnknownVoter(ReplicaId),
    #[error("replica key is malformed")]
    BadKey,
    #[error("signature does not verify")]
    BadSignature,
    #[error("secret seed must be 32 bytes")]
    BadSeed,
}

/// A replica's signing identity.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Keypair {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    pub fn from_seed(seed: &[u8]) -> Result<Self, CertError> {
        let seed: [u8; KEY_BYTES] = seed.try_into().map_err(|_| CertError::BadSeed)?;
        Ok(Keypair {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn seed(&self) -> [u8; KEY_BYTES] {
        self.signing_key.to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.signing_key.verifying_key().to_bytes().to_vec())
    }
}

/// Resolve a voter to its verification key through the replica table.
fn voter_key(config: &ReplicaConfig, voter: ReplicaId) -> Result<VerifyingKey, CertError> {
    let pubkey = config.pubkey(voter).ok_or(CertError::UnknownVoter(voter))?;
    let bytes: [u8; KEY_BYTES] = pubkey.as_bytes().try_into().map_err(|_| CertError::BadKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| CertError::BadKey)
}

fn check_part(
    key: &VerifyingKey,
    obj_hash: &H256,
    sig: &[u8; SIGNATURE_BYTES],
) -> Result<(), CertError> {
    key.verify(obj_hash.as_bytes(), &DalekSignature::from_bytes(sig))
        .map_err(|_| CertError::BadSignature)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartCert {
    pub obj_hash: H256,
    sig: [u8; SIGNATURE_BYTES],
}

impl PartCert {
    /// Sign a block hash with this replica's key.
    pub fn create(priv_key: &Keypair, obj_hash: H256) -> Self {
        let sig = priv_key.signing_key.sign(obj_hash.as_bytes()).to_bytes();
        PartCert { obj_hash, sig }
    }

    pub fn verify(&self, config: &ReplicaConfig, voter: ReplicaId) -> Result<(), CertError> {
        check_part(&voter_key(config, voter)?, &self.obj_hash, &self.sig)
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.put_hash(&self.obj_hash);
        w.put_bytes(&self.sig);
    }

    /// Construction from untrusted bytes; the signature length bound is
    /// enforced here.
    pub fn decode(r: &mut WireReader) -> Result<Self, WireError> {
        let obj_hash = r.read_hash()?;
        let sig: [u8; SIGNATURE_BYTES] = r
            .read_bytes()?
            .as_slice()
            .try_into()
            .map_err(|_| WireError::Invalid("signature length"))?;
        Ok(PartCert { obj_hash, sig })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumCert {
    obj_hash: H256,
    parts: BTreeMap<ReplicaId, [u8; SIGNATURE_BYTES]>,
    computed: bool,
}

impl QuorumCert {
    pub fn new(obj_hash: H256) -> Self {
        QuorumCert {
            obj_hash,
            parts: BTreeMap::new(),
            computed: false,
        }
    }

    pub fn obj_hash(&self) -> &H256 {
        &self.obj_hash
    }

    pub fn weight(&self) -> usize {
        self.parts.len()
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    /// Record one replica's partial. The caller deduplicates voters; a
    /// repeated insert here is a no-op.
    pub fn add_part(&mut self, voter: ReplicaId, part: PartCert) {
        debug_assert_eq!(part.obj_hash, self.obj_hash);
        self.parts.entry(voter).or_insert(part.sig);
    }

    /// Finalize the aggregation. After this the certificate is sealed and
    /// may travel inside blocks.
    pub fn compute(&mut self) {
        self.computed = true;
    }

    /// Check the certificate carries a quorum of valid signatures over
    /// `obj_hash` from replicas in the table.
    pub fn verify(&self, config: &ReplicaConfig) -> bool {
        if !self.computed || self.parts.len() < config.nmajority() {
            return false;
        }
        self.parts.iter().all(|(voter, sig)| {
            voter_key(config, *voter)
                .and_then(|key| check_part(&key, &self.obj_hash, sig))
                .is_ok()
        })
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.put_hash(&self.obj_hash);
        w.put_u32(self.parts.len() as u32);
        for (voter, sig) in &self.parts {
            w.put_u16(*voter);
            w.put_bytes(sig);
        }
    }

    pub fn decode(r: &mut WireReader) -> Result<Self, WireError> {
        let obj_hash = r.read_hash()?;
        let count = r.read_u32()? as usize;
        let mut parts = BTreeMap::new();
        for _ in 0..count {
            let voter = r.read_u16()?;
            let sig: [u8; SIGNATURE_BYTES] = r
                .read_bytes()?
                .as_slice()
                .try_into()
                .map_err(|_| WireError::Invalid("signature length"))?;
            if parts.insert(voter, sig).is_some() {
                return Err(WireError::Invalid("duplicate voter in certificate"));
            }
        }
        Ok(QuorumCert {
            obj_hash,
            parts,
            computed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::ReplicaInfo;

    fn cluster(n: usize) -> (Vec<Keypair>, ReplicaConfig) {
        let keys: Vec<Keypair> = (0..n).map(|_| Keypair::generate()).collect();
        let config = ReplicaConfig::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| ReplicaInfo {
                    id: i as ReplicaId,
                    pubkey: k.public_key(),
                })
                .collect(),
        );
        (keys, config)
    }

    #[test]
    fn partial_signs_and_verifies() {
        let (keys, config) = cluster(4);
        let hash = H256([1u8; 32]);
        let part = PartCert::create(&keys[2], hash);
        assert_eq!(part.verify(&config, 2), Ok(()));
    }

    #[test]
    fn partial_bound_to_voter_and_hash() {
        let (keys, config) = cluster(4);
        let hash = H256([1u8; 32]);
        let part = PartCert::create(&keys[2], hash);
        // right signature, wrong claimed voter
        assert_eq!(part.verify(&config, 1), Err(CertError::BadSignature));
        // voter outside the table
        assert_eq!(part.verify(&config, 9), Err(CertError::UnknownVoter(9)));
        // signature over a different hash
        let other = PartCert::create(&keys[2], H256([2u8; 32]));
        let forged = PartCert {
            obj_hash: hash,
            sig: other.sig,
        };
        assert_eq!(forged.verify(&config, 2), Err(CertError::BadSignature));
    }

    #[test]
    fn seed_roundtrip() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_seed(&keypair.seed()).unwrap();
        assert_eq!(restored.public_key(), keypair.public_key());
        assert!(matches!(
            Keypair::from_seed(&[0u8; 16]),
            Err(CertError::BadSeed)
        ));
    }

    #[test]
    fn quorum_forms_at_nmajority() {
        let (keys, config) = cluster(4);
        let hash = H256([3u8; 32]);
        let mut qc = QuorumCert::new(hash);
        for (i, key) in keys.iter().enumerate().take(3) {
            qc.add_part(i as ReplicaId, PartCert::create(key, hash));
        }
        qc.compute();
        assert!(qc.verify(&config));
    }

    #[test]
    fn below_quorum_fails_verification() {
        let (keys, config) = cluster(4);
        let hash = H256([3u8; 32]);
        let mut qc = QuorumCert::new(hash);
        for (i, key) in keys.iter().enumerate().take(2) {
            qc.add_part(i as ReplicaId, PartCert::create(key, hash));
        }
        qc.compute();
        assert!(!qc.verify(&config));
    }

    #[test]
    fn forged_partial_fails_verification() {
        let (keys, config) = cluster(4);
        let hash = H256([3u8; 32]);
        let mut qc = QuorumCert::new(hash);
        for (i, key) in keys.iter().enumerate().take(2) {
            qc.add_part(i as ReplicaId, PartCert::create(key, hash));
        }
        // third partial signed by the wrong key
        qc.add_part(3, PartCert::create(&keys[0], hash));
        qc.compute();
        assert!(!qc.verify(&config));
    }

    #[test]
    fn wire_roundtrip() {
        let (keys, _) = cluster(4);
        let hash = H256([5u8; 32]);
        let mut qc = QuorumCert::new(hash);
        for (i, key) in keys.iter().enumerate().take(3) {
            qc.add_part(i as ReplicaId, PartCert::create(key, hash));
        }
        qc.compute();

        let mut w = WireWriter::new();
        qc.encode(&mut w);
        let buf = w.into_vec();
        let mut r = WireReader::new(&buf);
        let decoded = QuorumCert::decode(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(decoded, qc);
    }

    #[test]
    fn decode_rejects_short_signature() {
        let part = PartCert::create(&Keypair::generate(), H256([7u8; 32]));
        let mut w = WireWriter::new();
        part.encode(&mut w);
        let mut buf = w.into_vec();
        // shrink the length prefix so the signature reads back truncated
        buf[32] = 16;
        buf.truncate(32 + 4 + 16);
        let mut r = WireReader::new(&buf);
        assert!(PartCert::decode(&mut r).is_err());
    }
}
