//! Wire records exchanged between the server and its clients.
//!
//! Every payload is a fixed-size binary record (or a flat array of them) in
//! bincode's fixed-width little-endian layout. Lengths are validated before
//! any bytes are decoded, so a truncated or mixed-version packet is rejected
//! instead of being read out of bounds.
//!
//! | Message        | Channel    | Direction        | Payload                       |
//! |----------------|------------|------------------|-------------------------------|
//! | Connect ack    | reliable   | server -> client | `u64` client id               |
//! | Input upload   | unreliable | client -> server | one [`InputSample`]           |
//! | World snapshot | unreliable | server -> all    | `n` x [`Snapshot`], no header |

use crate::error::ProtocolError;
use crate::input::InputSample;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Watermark reported before the server has applied any input for a client.
pub const NO_INPUT_WATERMARK: u64 = 0;

pub const CONNECT_ACK_SIZE: usize = 8;
/// 5 flag bytes + look_dx, look_dy, client_id, timestamp_ns, dt
pub const INPUT_SAMPLE_SIZE: usize = 5 + 5 * 8;
/// client_id, watermark, position, velocity, yaw, pitch
pub const SNAPSHOT_SIZE: usize = 8 + 8 + 3 * 4 + 3 * 4 + 8 + 8;

/// Authoritative state of one avatar, broadcast every server tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub client_id: u64,
    /// Timestamp of the newest input sample applied to this avatar
    pub watermark: u64,
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f64,
    pub pitch: f64,
}

impl Snapshot {
    /// Names the first field holding NaN or an infinity, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        if !self.position.is_finite() {
            Some("position")
        } else if !self.velocity.is_finite() {
            Some("velocity")
        } else if !self.yaw.is_finite() {
            Some("yaw")
        } else if !self.pitch.is_finite() {
            Some("pitch")
        } else {
            None
        }
    }
}

pub fn encode_connect_ack(client_id: u64) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serialize(&client_id)?)
}

pub fn decode_connect_ack(payload: &[u8]) -> Result<u64, ProtocolError> {
    check_length("connect ack", CONNECT_ACK_SIZE, payload)?;
    Ok(bincode::deserialize(payload)?)
}

pub fn encode_input_sample(sample: &InputSample) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serialize(sample)?)
}

/// Samples with a NaN or infinite look or dt field are rejected.
pub fn decode_input_sample(payload: &[u8]) -> Result<InputSample, ProtocolError> {
    check_length("input sample", INPUT_SAMPLE_SIZE, payload)?;
    let sample: InputSample = bincode::deserialize(payload)?;
    if let Some(field) = sample.non_finite_field() {
        return Err(ProtocolError::NonFinite {
            record: "input sample",
            field,
        });
    }
    Ok(sample)
}

/// Concatenates the records; the count is implied by the payload length.
pub fn encode_world_snapshot(snapshots: &[Snapshot]) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = Vec::with_capacity(snapshots.len() * SNAPSHOT_SIZE);
    for snapshot in snapshots {
        bincode::serialize_into(&mut payload, snapshot)?;
    }
    Ok(payload)
}

pub fn decode_world_snapshot(payload: &[u8]) -> Result<Vec<Snapshot>, ProtocolError> {
    if payload.len() % SNAPSHOT_SIZE != 0 {
        return Err(ProtocolError::Misaligned {
            record_size: SNAPSHOT_SIZE,
            actual: payload.len(),
        });
    }

    payload
        .chunks_exact(SNAPSHOT_SIZE)
        .map(|record| -> Result<Snapshot, ProtocolError> {
            let snapshot: Snapshot = bincode::deserialize(record)?;
            match snapshot.non_finite_field() {
                Some(field) => Err(ProtocolError::NonFinite {
                    record: "snapshot",
                    field,
                }),
                None => Ok(snapshot),
            }
        })
        .collect()
}

fn check_length(record: &'static str, expected: usize, payload: &[u8]) -> Result<(), ProtocolError> {
    if payload.len() != expected {
        return Err(ProtocolError::WrongLength {
            record,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sample() -> InputSample {
        InputSample {
            forward: true,
            jump: true,
            look_dx: -3.5,
            look_dy: 1.25,
            client_id: 7,
            timestamp_ns: 123_456_789,
            dt: 1.0 / 60.0,
            ..Default::default()
        }
    }

    fn test_snapshot(client_id: u64) -> Snapshot {
        Snapshot {
            client_id,
            watermark: 100_000_000,
            position: Vec3::new(1.0, 2.0, 3.0),
            velocity: Vec3::new(-1.0, 0.0, 0.5),
            yaw: 45.0,
            pitch: -10.0,
        }
    }

    #[test]
    fn test_record_sizes_match_encoding() {
        assert_eq!(encode_connect_ack(1).unwrap().len(), CONNECT_ACK_SIZE);
        assert_eq!(
            encode_input_sample(&test_sample()).unwrap().len(),
            INPUT_SAMPLE_SIZE
        );
        assert_eq!(
            encode_world_snapshot(&[test_snapshot(1)]).unwrap().len(),
            SNAPSHOT_SIZE
        );
    }

    #[test]
    fn test_connect_ack_is_little_endian_u64() {
        let payload = encode_connect_ack(0x0102).unwrap();
        assert_eq!(payload, vec![0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode_connect_ack(&payload).unwrap(), 0x0102);
    }

    #[test]
    fn test_input_sample_decodes() {
        let payload = encode_input_sample(&test_sample()).unwrap();
        assert_eq!(decode_input_sample(&payload).unwrap(), test_sample());
    }

    #[test]
    fn test_world_snapshot_preserves_order() {
        let snapshots = vec![test_snapshot(3), test_snapshot(1), test_snapshot(2)];
        let payload = encode_world_snapshot(&snapshots).unwrap();

        assert_eq!(payload.len(), 3 * SNAPSHOT_SIZE);
        let decoded = decode_world_snapshot(&payload).unwrap();
        let ids: Vec<u64> = decoded.iter().map(|s| s.client_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(decoded[0], snapshots[0]);
    }

    #[test]
    fn test_empty_world_snapshot() {
        let payload = encode_world_snapshot(&[]).unwrap();
        assert!(payload.is_empty());
        assert!(decode_world_snapshot(&payload).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_input_rejected() {
        let payload = encode_input_sample(&test_sample()).unwrap();
        match decode_input_sample(&payload[..INPUT_SAMPLE_SIZE - 1]) {
            Err(ProtocolError::WrongLength {
                expected, actual, ..
            }) => {
                assert_eq!(expected, INPUT_SAMPLE_SIZE);
                assert_eq!(actual, INPUT_SAMPLE_SIZE - 1);
            }
            other => panic!("Expected length error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_input_rejected() {
        let mut payload = encode_input_sample(&test_sample()).unwrap();
        payload.push(0);
        assert!(matches!(
            decode_input_sample(&payload),
            Err(ProtocolError::WrongLength { .. })
        ));
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let sample = InputSample {
            look_dx: f64::NAN,
            ..test_sample()
        };
        let payload = encode_input_sample(&sample).unwrap();
        match decode_input_sample(&payload) {
            Err(ProtocolError::NonFinite { record, field }) => {
                assert_eq!(record, "input sample");
                assert_eq!(field, "look_dx");
            }
            other => panic!("Expected non-finite error, got {:?}", other),
        }

        let sample = InputSample {
            dt: f64::INFINITY,
            ..test_sample()
        };
        let payload = encode_input_sample(&sample).unwrap();
        assert!(matches!(
            decode_input_sample(&payload),
            Err(ProtocolError::NonFinite { field: "dt", .. })
        ));
    }

    #[test]
    fn test_non_finite_snapshot_rejected() {
        let mut bad = test_snapshot(2);
        bad.position.x = f32::NAN;
        let payload = encode_world_snapshot(&[test_snapshot(1), bad]).unwrap();
        assert!(matches!(
            decode_world_snapshot(&payload),
            Err(ProtocolError::NonFinite {
                record: "snapshot",
                field: "position"
            })
        ));
    }

    #[test]
    fn test_misaligned_world_snapshot_rejected() {
        let mut payload = encode_world_snapshot(&[test_snapshot(1)]).unwrap();
        payload.push(0xFF);
        assert!(matches!(
            decode_world_snapshot(&payload),
            Err(ProtocolError::Misaligned { actual, .. }) if actual == SNAPSHOT_SIZE + 1
        ));
    }

    #[test]
    fn test_invalid_flag_byte_rejected() {
        let mut payload = encode_input_sample(&test_sample()).unwrap();
        payload[0] = 7;
        assert!(matches!(
            decode_input_sample(&payload),
            Err(ProtocolError::Codec(_))
        ));
    }

    #[test]
    fn test_wrong_ack_length_rejected() {
        assert!(decode_connect_ack(&[1, 2, 3]).is_err());
        assert!(decode_connect_ack(&[0; SNAPSHOT_SIZE]).is_err());
    }
}
