//! Minimal legacy-format raw transaction encode/decode. The wallet only
//! ever builds and signs its own transactions and relays externally
//! supplied raw bytes opaquely as BEEF payloads, so this needs just enough
//! of the classic `version | vin | vout | lockTime` layout to assemble,
//! reparse, and size-estimate a transaction — not a full script
//! interpreter, which is explicitly out of scope (§1).

use sha2::{Digest, Sha256};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct RawInput {
    pub prev_tx_id: String, // big-endian hex, display order
    pub prev_vout: u32,
    pub script: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone)]
pub struct RawOutput {
    pub satoshis: i64,
    pub script: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RawTx {
    pub version: u32,
    pub inputs: Vec<RawInput>,
    pub outputs: Vec<RawOutput>,
    pub lock_time: u32,
}

fn write_varint(out: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        out.push(n as u8);
    } else if n <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

fn read_varint(data: &[u8], offset: usize) -> Result<(u64, usize), AppError> {
    let first = *data
        .get(offset)
        .ok_or_else(|| AppError::Validation("truncated varint".to_string()))?;
    match first {
        0xfd => {
            let b = data
                .get(offset + 1..offset + 3)
                .ok_or_else(|| AppError::Validation("truncated varint".to_string()))?;
            Ok((u16::from_le_bytes([b[0], b[1]]) as u64, offset + 3))
        }
        0xfe => {
            let b = data
                .get(offset + 1..offset + 5)
                .ok_or_else(|| AppError::Validation("truncated varint".to_string()))?;
            Ok((u32::from_le_bytes(b.try_into().unwrap()) as u64, offset + 5))
        }
        0xff => {
            let b = data
                .get(offset + 1..offset + 9)
                .ok_or_else(|| AppError::Validation("truncated varint".to_string()))?;
            Ok((u64::from_le_bytes(b.try_into().unwrap()), offset + 9))
        }
        n => Ok((n as u64, offset + 1)),
    }
}

impl RawTx {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            let mut txid_bytes = hex::decode(&input.prev_tx_id).unwrap_or_default();
            txid_bytes.reverse();
            out.extend_from_slice(&txid_bytes);
            out.extend_from_slice(&input.prev_vout.to_le_bytes());
            write_varint(&mut out, input.script.len() as u64);
            out.extend_from_slice(&input.script);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.satoshis.to_le_bytes());
            write_varint(&mut out, output.script.len() as u64);
            out.extend_from_slice(&output.script);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        if bytes.len() < 5 {
            return Err(AppError::Validation("raw tx too short".to_string()));
        }
        let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let mut offset = 4;

        let (input_count, next) = read_varint(bytes, offset)?;
        offset = next;
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            let mut txid_bytes = bytes
                .get(offset..offset + 32)
                .ok_or_else(|| AppError::Validation("truncated input txid".to_string()))?
                .to_vec();
            txid_bytes.reverse();
            offset += 32;
            let prev_vout = u32::from_le_bytes(
                bytes
                    .get(offset..offset + 4)
                    .ok_or_else(|| AppError::Validation("truncated vout".to_string()))?
                    .try_into()
                    .unwrap(),
            );
            offset += 4;
            let (script_len, next) = read_varint(bytes, offset)?;
            offset = next;
            let script = bytes
                .get(offset..offset + script_len as usize)
                .ok_or_else(|| AppError::Validation("truncated script".to_string()))?
                .to_vec();
            offset += script_len as usize;
            let sequence = u32::from_le_bytes(
                bytes
                    .get(offset..offset + 4)
                    .ok_or_else(|| AppError::Validation("truncated sequence".to_string()))?
                    .try_into()
                    .unwrap(),
            );
            offset += 4;
            inputs.push(RawInput {
                prev_tx_id: hex::encode(txid_bytes),
                prev_vout,
                script,
                sequence,
            });
        }

        let (output_count, next) = read_varint(bytes, offset)?;
        offset = next;
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            let satoshis = i64::from_le_bytes(
                bytes
                    .get(offset..offset + 8)
                    .ok_or_else(|| AppError::Validation("truncated output value".to_string()))?
                    .try_into()
                    .unwrap(),
            );
            offset += 8;
            let (script_len, next) = read_varint(bytes, offset)?;
            offset = next;
            let script = bytes
                .get(offset..offset + script_len as usize)
                .ok_or_else(|| AppError::Validation("truncated output script".to_string()))?
                .to_vec();
            offset += script_len as usize;
            outputs.push(RawOutput { satoshis, script });
        }

        let lock_time = u32::from_le_bytes(
            bytes
                .get(offset..offset + 4)
                .ok_or_else(|| AppError::Validation("truncated lockTime".to_string()))?
                .try_into()
                .unwrap(),
        );

        Ok(RawTx {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    /// Double-SHA256 of the encoded bytes, reversed to display order —
    /// the transaction's content-addressed identifier.
    pub fn tx_id(&self) -> String {
        let bytes = self.encode();
        let first = Sha256::digest(&bytes);
        let second = Sha256::digest(first);
        let mut reversed: Vec<u8> = second.to_vec();
        reversed.reverse();
        hex::encode(reversed)
    }

    /// True if every input's sequence number is final (0xffffffff), the
    /// condition under which `lockTime` has no effect.
    pub fn is_final(&self) -> bool {
        self.inputs.iter().all(|i| i.sequence == 0xffff_ffff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawTx {
        RawTx {
            version: 1,
            inputs: vec![RawInput {
                prev_tx_id: "aa".repeat(32),
                prev_vout: 0,
                script: vec![1, 2, 3],
                sequence: 0xffff_ffff,
            }],
            outputs: vec![RawOutput {
                satoshis: 1000,
                script: vec![0x76, 0xa9],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn encode_decode_roundtrips() {
        let tx = sample();
        let bytes = tx.encode();
        let decoded = RawTx::decode(&bytes).unwrap();
        assert_eq!(decoded.version, tx.version);
        assert_eq!(decoded.inputs[0].prev_tx_id, tx.inputs[0].prev_tx_id);
        assert_eq!(decoded.outputs[0].satoshis, tx.outputs[0].satoshis);
    }

    #[test]
    fn tx_id_is_deterministic() {
        let tx = sample();
        assert_eq!(tx.tx_id(), tx.tx_id());
        assert_eq!(tx.tx_id().len(), 64);
    }

    #[test]
    fn is_final_checks_all_input_sequences() {
        let mut tx = sample();
        assert!(tx.is_final());
        tx.inputs[0].sequence = 0;
        assert!(!tx.is_final());
    }
}
