// ============================================================================
// ARBOR CRYPTO - Vote Certificates and Hashing
// ============================================================================
// PURPOSE: The signature scheme behind voting, expressed at the certificate
// level: a replica signs a block hash into a partial certificate, and n - f
// partials over the same hash combine into a quorum certificate verified
// against the replica table.
//
// CRYPTOGRAPHIC SUITE:
// - Signing: Ed25519 (partial certificates over block hashes)
// - Hashing: SHA-256 (content addressing)
// ============================================================================

pub mod cert;
pub mod hash;

pub use cert::{CertError, Keypair, PartCert, QuorumCert, SIGNATURE_BYTES};
pub use hash::{sha256, sha256_h256};
