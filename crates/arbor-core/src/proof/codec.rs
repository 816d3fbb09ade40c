//! Binary proof encoding
//!
//! ```text
//! proof     := kind:u8 body
//! kind      := 0x01 existence | 0x02 absence
//! existence := key_len:u32 key value_hash:[32] version:u64
//!              count:u32 (position:u8 height:u8 size:u64 version:u64 sibling:[32])*
//! absence   := flags:u8 (bit0 predecessor, bit1 successor) existence? existence?
//! ```
//!
//! All integers are big-endian. Entries run from the leaf's parent to the
//! root. The encoding is canonical: a decoded proof re-encodes to the exact
//! input bytes.

use super::{
    AbsenceProof, ExistenceProof, Position, ProofInnerNode, ProofLeafNode, TreeProof, ABSENCE,
    EXISTENCE,
};
use crate::{CoreError, Result};
use arbor_crypto::{Blake3Hash, HASH_BYTE_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const KIND_EXISTENCE: u8 = 0x01;
pub const KIND_ABSENCE: u8 = 0x02;

const FLAG_PREDECESSOR: u8 = 0b01;
const FLAG_SUCCESSOR: u8 = 0b10;

const POSITION_LEFT: u8 = 0;
const POSITION_RIGHT: u8 = 1;

/// Encoded size of one path entry
const ENTRY_LEN: usize = 1 + 1 + 8 + 8 + HASH_BYTE_SIZE;

/// A path longer than this cannot have strictly increasing `u8` heights
const MAX_PATH_LEN: usize = u8::MAX as usize;

/// Encode any proof
///
/// Leaf keys longer than `u32::MAX` bytes cannot be represented; the tree
/// never produces them.
pub fn encode(proof: &TreeProof) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(proof));
    match proof {
        TreeProof::Existence(proof) => {
            buf.put_u8(KIND_EXISTENCE);
            put_existence(&mut buf, proof);
        }
        TreeProof::Absence(proof) => {
            buf.put_u8(KIND_ABSENCE);
            let mut flags = 0;
            if proof.predecessor.is_some() {
                flags |= FLAG_PREDECESSOR;
            }
            if proof.successor.is_some() {
                flags |= FLAG_SUCCESSOR;
            }
            buf.put_u8(flags);
            for neighbour in [&proof.predecessor, &proof.successor].into_iter().flatten() {
                put_existence(&mut buf, neighbour);
            }
        }
    }
    buf.freeze()
}

/// Decode any proof, rejecting trailing bytes
pub fn decode(bytes: &[u8]) -> Result<TreeProof> {
    let mut buf = bytes;
    ensure(&buf, 1, "proof kind")?;
    let proof = match buf.get_u8() {
        KIND_EXISTENCE => TreeProof::Existence(get_existence(&mut buf)?),
        KIND_ABSENCE => {
            ensure(&buf, 1, "absence flags")?;
            let flags = buf.get_u8();
            if flags & !(FLAG_PREDECESSOR | FLAG_SUCCESSOR) != 0 {
                return Err(malformed(format!("unknown absence flags {flags:#04x}")));
            }
            let predecessor = if flags & FLAG_PREDECESSOR != 0 {
                Some(get_existence(&mut buf)?)
            } else {
                None
            };
            let successor = if flags & FLAG_SUCCESSOR != 0 {
                Some(get_existence(&mut buf)?)
            } else {
                None
            };
            TreeProof::Absence(AbsenceProof {
                predecessor,
                successor,
            })
        }
        kind => return Err(malformed(format!("unknown proof kind {kind:#04x}"))),
    };
    if buf.has_remaining() {
        return Err(malformed(format!("{} trailing bytes", buf.remaining())));
    }
    Ok(proof)
}

/// Decode bytes that must hold an existence proof
pub fn decode_existence(bytes: &[u8]) -> Result<ExistenceProof> {
    match decode(bytes)? {
        TreeProof::Existence(proof) => Ok(proof),
        TreeProof::Absence(_) => Err(CoreError::WrongProofKind {
            expected: EXISTENCE,
            found: ABSENCE,
        }),
    }
}

/// Decode bytes that must hold an absence proof
pub fn decode_absence(bytes: &[u8]) -> Result<AbsenceProof> {
    match decode(bytes)? {
        TreeProof::Absence(proof) => Ok(proof),
        TreeProof::Existence(_) => Err(CoreError::WrongProofKind {
            expected: ABSENCE,
            found: EXISTENCE,
        }),
    }
}

fn encoded_len(proof: &TreeProof) -> usize {
    let existence_len =
        |p: &ExistenceProof| 4 + p.leaf.key.len() + HASH_BYTE_SIZE + 8 + 4 + p.path.len() * ENTRY_LEN;
    match proof {
        TreeProof::Existence(p) => 1 + existence_len(p),
        TreeProof::Absence(p) => {
            2 + [&p.predecessor, &p.successor]
                .into_iter()
                .flatten()
                .map(existence_len)
                .sum::<usize>()
        }
    }
}

fn put_existence(buf: &mut BytesMut, proof: &ExistenceProof) {
    debug_assert!(u32::try_from(proof.leaf.key.len()).is_ok());
    buf.put_u32(proof.leaf.key.len() as u32);
    buf.put_slice(&proof.leaf.key);
    buf.put_slice(proof.leaf.value_hash.as_bytes());
    buf.put_u64(proof.leaf.version);

    buf.put_u32(proof.path.len() as u32);
    for entry in &proof.path {
        buf.put_u8(match entry.position {
            Position::Left => POSITION_LEFT,
            Position::Right => POSITION_RIGHT,
        });
        buf.put_u8(entry.height);
        buf.put_u64(entry.size);
        buf.put_u64(entry.version);
        buf.put_slice(entry.sibling.as_bytes());
    }
}

fn get_existence(buf: &mut &[u8]) -> Result<ExistenceProof> {
    ensure(buf, 4, "key length")?;
    let key_len = buf.get_u32() as usize;
    if key_len == 0 {
        return Err(malformed("empty leaf key"));
    }
    ensure(buf, key_len, "leaf key")?;
    let key = buf.copy_to_bytes(key_len);
    let value_hash = get_hash(buf, "value hash")?;
    ensure(buf, 8, "leaf version")?;
    let version = buf.get_u64();

    ensure(buf, 4, "path length")?;
    let count = buf.get_u32() as usize;
    if count > MAX_PATH_LEN {
        return Err(malformed(format!("path of {count} entries is too long")));
    }
    // Checked against the remaining input before allocating
    ensure(buf, count * ENTRY_LEN, "path entries")?;

    let mut path: Vec<ProofInnerNode> = Vec::with_capacity(count);
    for i in 0..count {
        let position = match buf.get_u8() {
            POSITION_LEFT => Position::Left,
            POSITION_RIGHT => Position::Right,
            other => return Err(malformed(format!("entry {i}: unknown position {other}"))),
        };
        let entry = ProofInnerNode {
            position,
            height: buf.get_u8(),
            size: buf.get_u64(),
            version: buf.get_u64(),
            sibling: get_hash(buf, "sibling hash")?,
        };

        match path.last() {
            Some(prev) if entry.height <= prev.height || entry.size <= prev.size => {
                return Err(malformed(format!(
                    "entry {i}: height {} size {} do not increase along the path",
                    entry.height, entry.size
                )));
            }
            None if entry.height == 0 || entry.size < 2 => {
                return Err(malformed(format!(
                    "entry {i}: height {} size {} cannot be an inner node",
                    entry.height, entry.size
                )));
            }
            _ => {}
        }
        path.push(entry);
    }

    Ok(ExistenceProof {
        leaf: ProofLeafNode {
            key,
            value_hash,
            version,
        },
        path,
    })
}

fn get_hash(buf: &mut &[u8], what: &str) -> Result<Blake3Hash> {
    ensure(buf, HASH_BYTE_SIZE, what)?;
    let mut bytes = [0u8; HASH_BYTE_SIZE];
    buf.copy_to_slice(&mut bytes);
    Ok(Blake3Hash::new(bytes))
}

fn ensure(buf: &&[u8], needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(malformed(format!(
            "truncated {what}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn malformed(reason: impl Into<String>) -> CoreError {
    CoreError::MalformedProof(reason.into())
}

impl TreeProof {
    /// Serialize to the canonical wire format
    pub fn to_bytes(&self) -> Bytes {
        encode(self)
    }

    /// Deserialize from the canonical wire format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

impl ExistenceProof {
    pub fn to_bytes(&self) -> Bytes {
        encode(&TreeProof::Existence(self.clone()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode_existence(bytes)
    }
}

impl AbsenceProof {
    pub fn to_bytes(&self) -> Bytes {
        encode(&TreeProof::Absence(self.clone()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode_absence(bytes)
    }
}
