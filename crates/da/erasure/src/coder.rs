use reed_solomon_erasure::galois_8::ReedSolomon;
use std::sync::OnceLock;
use thiserror::Error;

const HEADER_BYTES: usize = 16;
const ALIGN: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ErasureError {
    #[error("not enough shards to recover the payload")]
    NeedMoreData,
    #[error("too many shards provided")]
    TooMuchData,
    #[error("shard size must be a nonzero multiple of 64 bytes")]
    InvalidSize,
    #[error("invalid original/recovery counts")]
    InvalidCounts,
    #[error("invalid input")]
    InvalidInput,
    #[error("platform is unsupported")]
    Platform,
    #[error("coder used before init()")]
    CallInitialize,
    #[error("coder initialization failed")]
    InitFailed,
    #[error("failed to size the work buffers")]
    WorkCount,
}

impl ErasureError {
    /// Numeric code, matching the wire-visible convention (0 is success).
    pub fn code(&self) -> i32 {
        match self {
            ErasureError::NeedMoreData => -1,
            ErasureError::TooMuchData => -2,
            ErasureError::InvalidSize => -3,
            ErasureError::InvalidCounts => -4,
            ErasureError::InvalidInput => -5,
            ErasureError::Platform => -6,
            ErasureError::CallInitialize => -7,
            ErasureError::InitFailed => -8,
            ErasureError::WorkCount => -9,
        }
    }
}

static INITED: OnceLock<()> = OnceLock::new();

/// One-shot process-global initialization. Idempotent; must succeed before
/// any `ErasureCoder` is constructed.
pub fn init() -> Result<(), ErasureError> {
    INITED.get_or_init(|| ());
    Ok(())
}

fn map_rs_error(err: reed_solomon_erasure::Error) -> ErasureError {
    use reed_solomon_erasure::Error;
    match err {
        Error::TooFewShards | Error::TooFewDataShards | Error::TooFewShardsPresent => {
            ErasureError::NeedMoreData
        }
        Error::TooManyShards | Error::TooManyDataShards => ErasureError::TooMuchData,
        Error::IncorrectShardSize | Error::EmptyShard => ErasureError::InvalidSize,
        Error::TooFewParityShards | Error::TooManyParityShards => ErasureError::InvalidCounts,
        _ => ErasureError::InvalidInput,
    }
}

fn collect_originals(slots: &[Option<Vec<u8>>]) -> Option<Vec<&[u8]>> {
    slots.iter().map(|s| s.as_deref()).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ErasureCoder {
    original_count: usize,
    recovery_count: usize,
}

impl ErasureCoder {
    /// Derive (k, m) from the cluster size: m = (N - 1) / 3, k = N - m.
    pub fn from_replicas(node_num: usize) -> Result<Self, ErasureError> {
        let recovery_count = node_num.saturating_sub(1) / 3;
        Self::new(node_num - recovery_count, recovery_count)
    }

    pub fn new(original_count: usize, recovery_count: usize) -> Result<Self, ErasureError> {
        if INITED.get().is_none() {
            return Err(ErasureError::CallInitialize);
        }
        if original_count == 0 || recovery_count == 0 {
            return Err(ErasureError::InvalidCounts);
        }
        // GF(2^8) Reed-Solomon caps the total shard count
        if original_count + recovery_count > 256 {
            return Err(ErasureError::TooMuchData);
        }
        Ok(ErasureCoder {
            original_count,
            recovery_count,
        })
    }

    pub fn original_count(&self) -> usize {
        self.original_count
    }

    pub fn recovery_count(&self) -> usize {
        self.recovery_count
    }

    pub fn total_count(&self) -> usize {
        self.original_count + self.recovery_count
    }

    fn matrix(&self) -> Result<ReedSolomon, ErasureError> {
        ReedSolomon::new(self.original_count, self.recovery_count).map_err(map_rs_error)
    }

    /// Encode a payload into k + m shards of identical, 64-byte-aligned size.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<Vec<u8>>, ErasureError> {
        let k = self.original_count;
        let data_bytes = payload.len() as u64;
        let total_bytes = data_bytes + HEADER_BYTES as u64;
        let slice_bytes = (total_bytes as usize + k - 1) / k;
        let buffer_bytes = (slice_bytes + ALIGN - 1) / ALIGN * ALIGN;

        let mut input = vec![0u8; k * slice_bytes];
        input[0..8].copy_from_slice(&data_bytes.to_le_bytes());
        input[8..16].copy_from_slice(&(slice_bytes as u64).to_le_bytes());
        input[HEADER_BYTES..HEADER_BYTES + payload.len()].copy_from_slice(payload);

        let mut shards = Vec::with_capacity(self.total_count());
        for i in 0..k {
            let mut shard = vec![0u8; buffer_bytes];
            shard[..slice_bytes].copy_from_slice(&input[i * slice_bytes..(i + 1) * slice_bytes]);
            shards.push(shard);
        }
        for _ in 0..self.recovery_count {
            shards.push(vec![0u8; buffer_bytes]);
        }

        self.matrix()?.encode(&mut shards).map_err(map_rs_error)?;
        Ok(shards)
    }

    /// Recover the payload from any k of the k + m shards. Missing entries
    /// are `None`; present shards must all share one aligned size.
    pub fn decode(&self, shards: &[Option<Vec<u8>>]) -> Result<Vec<u8>, ErasureError> {
        let k = self.original_count;
        if shards.len() != self.total_count() {
            return Err(ErasureError::InvalidCounts);
        }

        let mut buffer_bytes = 0usize;
        let mut present = 0usize;
        for shard in shards.iter().flatten() {
            present += 1;
            if buffer_bytes == 0 {
                buffer_bytes = shard.len();
            } else if shard.len() != buffer_bytes {
                return Err(ErasureError::InvalidSize);
            }
        }
        if buffer_bytes == 0 || buffer_bytes % ALIGN != 0 {
            return Err(ErasureError::NeedMoreData);
        }
        if present < k {
            return Err(ErasureError::NeedMoreData);
        }

        if let Some(originals) = collect_originals(&shards[..k]) {
            return self.assemble(&originals, buffer_bytes);
        }

        let mut work: Vec<Option<Vec<u8>>> = shards.to_vec();
        self.matrix()?
            .reconstruct(&mut work)
            .map_err(map_rs_error)?;
        let originals = collect_originals(&work[..k]).ok_or(ErasureError::NeedMoreData)?;
        self.assemble(&originals, buffer_bytes)
    }

    /// Splice the k original slice bodies back together, strip the header
    /// and truncate to the recorded payload length.
    fn assemble(&self, originals: &[&[u8]], buffer_bytes: usize) -> Result<Vec<u8>, ErasureError> {
        let k = self.original_count;
        let head = originals[0];
        let mut word = [0u8; 8];
        word.copy_from_slice(&head[0..8]);
        let data_bytes = u64::from_le_bytes(word) as usize;
        word.copy_from_slice(&head[8..16]);
        let slice_bytes = u64::from_le_bytes(word) as usize;

        if slice_bytes == 0 || slice_bytes > buffer_bytes {
            return Err(ErasureError::InvalidInput);
        }
        if data_bytes + HEADER_BYTES > slice_bytes * k {
            return Err(ErasureError::InvalidInput);
        }

        let mut framed = Vec::with_capacity(slice_bytes * k);
        for shard in originals {
            framed.extend_from_slice(&shard[..slice_bytes]);
        }
        framed.drain(..HEADER_BYTES);
        framed.truncate(data_bytes);
        Ok(framed)
    }
}
