// SPDX-FileCopyrightText: 2025 Roman Valls, 2025
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! `[version][end state code][sha256(version, code)]`

#[allow(unused_imports)]
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use upgrade::EndState;

pub const RECORD_VERSION: u8 = 1;
const DIGEST_LEN: usize = 32;
pub const RECORD_LEN: usize = 2 + DIGEST_LEN;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecordError {
    BadLength,
    UnsupportedVersion(u8),
    DigestMismatch,
    UnknownEndState(u8),
}

fn digest(version: u8, code: u8) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update([version, code]);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub fn encode(end_state: EndState) -> [u8; RECORD_LEN] {
    let code = end_state.code();
    let mut record = [0u8; RECORD_LEN];
    record[0] = RECORD_VERSION;
    record[1] = code;
    record[2..].copy_from_slice(&digest(RECORD_VERSION, code));
    record
}

pub fn decode(bytes: &[u8]) -> Result<EndState, RecordError> {
    if bytes.len() != RECORD_LEN {
        return Err(RecordError::BadLength);
    }
    let (version, code) = (bytes[0], bytes[1]);
    if version != RECORD_VERSION {
        return Err(RecordError::UnsupportedVersion(version));
    }
    if bytes[2..] != digest(version, code) {
        warn!("Reboot record digest mismatch");
        return Err(RecordError::DigestMismatch);
    }
    EndState::from_code(code).ok_or(RecordError::UnknownEndState(code))
}

#[cfg(test)]
mod record_tests {
    use super::*;

    #[test]
    fn layout() {
        let record = encode(EndState::Success);
        assert_eq!(record.len(), RECORD_LEN);
        assert_eq!(record[0], RECORD_VERSION);
        assert_eq!(record[1], 1);
        assert_eq!(decode(&record), Ok(EndState::Success));
        assert_eq!(
            decode(&encode(EndState::UnknownError)),
            Ok(EndState::UnknownError)
        );
    }

    #[test]
    fn corrupt_records_are_refused() {
        let record = encode(EndState::Success);

        assert_eq!(decode(&record[..10]), Err(RecordError::BadLength));

        let mut flipped = record;
        flipped[1] = EndState::UnknownError.code();
        assert_eq!(decode(&flipped), Err(RecordError::DigestMismatch));

        let mut tail = record;
        tail[RECORD_LEN - 1] ^= 0x01;
        assert_eq!(decode(&tail), Err(RecordError::DigestMismatch));

        let mut version = record;
        version[0] = 7;
        assert_eq!(decode(&version), Err(RecordError::UnsupportedVersion(7)));

        let mut unknown = [0u8; RECORD_LEN];
        unknown[0] = RECORD_VERSION;
        unknown[1] = 9;
        unknown[2..].copy_from_slice(&digest(RECORD_VERSION, 9));
        assert_eq!(decode(&unknown), Err(RecordError::UnknownEndState(9)));

        assert!(decode(&[0xff; RECORD_LEN]).is_err());
    }
}
