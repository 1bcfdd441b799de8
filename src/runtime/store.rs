//! Binary persistence for Notch-LoRA units.
//!
//! Layout (all little-endian):
//!
//! ```text
//! magic    b"NTLR"
//! version  u32
//! params   7 × f32   in_dim, out_dim, rank, alpha, lr, decay, delta_norm
//! seed     u32
//! A        in_dim·rank × f32   row-major, A[i, r] at i·rank + r
//! B        rank·out_dim × f32  row-major, B[r, j] at r·out_dim + j
//! ```

use std::path::Path;

use anyhow::{bail, ensure, Context, Result};

use crate::config::PARAMS_LEN;
use crate::learning::lora::NotchLora;

pub const MAGIC: &[u8; 4] = b"NTLR";
pub const VERSION: u32 = 1;

/// Bytes before the factor payload.
pub const HEADER_LEN: usize = 4 + 4 + PARAMS_LEN * 4 + 4;

/// Serialise a unit.
pub fn encode(lora: &NotchLora) -> Vec<u8> {
    let a = lora.a_raw();
    let b = lora.b_raw();
    let mut out = Vec::with_capacity(HEADER_LEN + 4 * (a.len() + b.len()));

    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    for v in lora.params().to_array() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&lora.seed().to_le_bytes());
    for v in a.iter().chain(b) {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take4(&mut self) -> Result<[u8; 4]> {
        let end = self.pos + 4;
        ensure!(end <= self.bytes.len(), "unexpected end of data at byte {}", self.pos);
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        Ok(word)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take4()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take4()?))
    }

    fn f32s(&mut self, n: usize) -> Result<Vec<f32>> {
        (0..n).map(|_| self.f32()).collect()
    }
}

fn dimension(name: &str, v: f32) -> Result<usize> {
    if v.is_finite() && v >= 1.0 && v.fract() == 0.0 {
        Ok(v as usize)
    } else {
        bail!("invalid {} in header: {}", name, v)
    }
}

/// Rebuild a unit from [`encode`] output. Factors, hyperparameters and
/// generator state are restored exactly.
pub fn decode(bytes: &[u8]) -> Result<NotchLora> {
    let mut r = Reader { bytes, pos: 0 };

    let magic = r.take4()?;
    if &magic != MAGIC {
        bail!("bad magic {:?}", magic);
    }
    let version = r.u32()?;
    if version != VERSION {
        bail!("unsupported version {} (expected {})", version, VERSION);
    }

    let in_dim = dimension("in_dim", r.f32()?)?;
    let out_dim = dimension("out_dim", r.f32()?)?;
    let rank = dimension("rank", r.f32()?)?;
    let alpha = r.f32()?;
    let lr = r.f32()?;
    let decay = r.f32()?;
    let _delta_norm = r.f32()?;
    let seed = r.u32()?;

    let n_a = in_dim
        .checked_mul(rank)
        .context("A size overflows usize")?;
    let n_b = rank
        .checked_mul(out_dim)
        .context("B size overflows usize")?;
    let expected = n_a
        .checked_add(n_b)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(HEADER_LEN))
        .context("payload size overflows usize")?;
    ensure!(
        bytes.len() == expected,
        "payload is {} bytes, expected {} for {}x{}x{}",
        bytes.len(),
        expected,
        in_dim,
        rank,
        out_dim
    );

    let a = r.f32s(n_a)?;
    let b = r.f32s(n_b)?;

    let mut lora = NotchLora::new(in_dim, out_dim, rank, alpha, lr, decay, seed)?;
    lora.load_factors(&a, &b)?;
    lora.set_seed(seed);
    Ok(lora)
}

/// Write a unit to `path`.
pub fn save(path: &Path, lora: &NotchLora) -> Result<()> {
    let bytes = encode(lora);
    std::fs::write(path, &bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(
        "saved {}x{}x{} delta ({} bytes) to {}",
        lora.in_dim(),
        lora.rank(),
        lora.out_dim(),
        bytes.len(),
        path.display()
    );
    Ok(())
}

/// Read a unit from `path`.
pub fn load(path: &Path) -> Result<NotchLora> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let lora = decode(&bytes).with_context(|| format!("failed to decode {}", path.display()))?;
    tracing::info!(
        "loaded {}x{}x{} delta (norm {:.4}) from {}",
        lora.in_dim(),
        lora.rank(),
        lora.out_dim(),
        lora.delta_norm(),
        path.display()
    );
    Ok(lora)
}
