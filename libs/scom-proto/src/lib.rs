//! Frame codec for the Studer scom serial protocol.
//!
//! A scom frame is a fixed-size header followed by a variable-length data
//! section, each protected by a 2-byte running checksum:
//!
//! ```text
//! | 0xAA | flags | src_addr (4, LE) | dst_addr (4, LE) | data_len (2, LE) | hdr cksum (2) |
//! | service_flags | service_id | object_type (2) | object_id (4) | property_id (2) | data... | cksum (2) |
//! ```
//!
//! The header's `data_len` counts the data section without its trailing
//! checksum; [`FrameHeader::length_to_read`] is the byte count a caller must
//! read off the wire after the header.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// First byte of every frame.
pub const FRAME_START_BYTE: u8 = 0xAA;
/// Size of the fixed frame header, including its checksum.
pub const FRAME_HEADER_SIZE: usize = 14;
/// Size of a running checksum.
pub const CHECKSUM_SIZE: usize = 2;
/// Upper bound on the data section of any frame this codec will produce or
/// accept; protects callers from runaway reads off a corrupted length field.
pub const MAX_FRAME_SIZE: usize = 128;

/// Source address used for requests originating from the gateway side.
pub const GATEWAY_SRC_ADDR: u32 = 1;

/// Service id of a property read.
pub const SERVICE_READ_PROPERTY: u8 = 0x01;
/// Service id of a property write.
pub const SERVICE_WRITE_PROPERTY: u8 = 0x02;
/// Object type of a user-information value (live measurement).
pub const OBJECT_TYPE_USER_INFO: u16 = 0x0001;
/// Object type of a configuration parameter.
pub const OBJECT_TYPE_PARAMETER: u16 = 0x0002;
/// Property selector for the current value of a user-information object.
pub const PROPERTY_USER_INFO_VALUE: u16 = 0x0001;
/// Property selector for the unsaved (QSP) value of a parameter object.
pub const PROPERTY_PARAMETER_VALUE_QSP: u16 = 0x0005;

/// Service flag: frame is a response.
const SERVICE_FLAG_RESPONSE: u8 = 0x01;
/// Service flag: response carries a device error code instead of data.
const SERVICE_FLAG_ERROR: u8 = 0x02;

/// Fixed layout of the request/response data section up to `property_data`.
const FRAME_DATA_FIXED_SIZE: usize = 10;

/// Codec errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScomError {
    #[error("frame too short: got {got} bytes, need {need}")]
    FrameTooShort { got: usize, need: usize },

    #[error("invalid start byte 0x{0:02X}")]
    InvalidStartByte(u8),

    #[error("checksum mismatch: expected {expected:02X?}, got {got:02X?}")]
    ChecksumMismatch { expected: [u8; 2], got: [u8; 2] },

    #[error("frame data length {got} does not match header ({need})")]
    LengthMismatch { got: usize, need: usize },

    #[error("object id {0} is not encodable")]
    InvalidObjectId(u32),

    #[error("device reported error code {0}")]
    Device(u16),

    #[error("property data is not a {expected}-byte value (got {got} bytes)")]
    InvalidValueLength { expected: usize, got: usize },
}

/// Running 2-byte checksum over `data`.
///
/// Byte A accumulates the data, byte B accumulates A; both wrap at 8 bits.
pub fn checksum(data: &[u8]) -> [u8; 2] {
    let mut a: u8 = 0xFF;
    let mut b: u8 = 0x00;
    for &byte in data {
        a = a.wrapping_add(byte);
        b = b.wrapping_add(a);
    }
    [a, b]
}

fn verify_checksum(payload: &[u8], received: &[u8]) -> Result<(), ScomError> {
    let expected = checksum(payload);
    if received != expected {
        return Err(ScomError::ChecksumMismatch {
            expected,
            got: [received[0], received[1]],
        });
    }
    Ok(())
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub flags: u8,
    pub src_addr: u32,
    pub dst_addr: u32,
    pub data_length: u16,
}

impl FrameHeader {
    /// Number of bytes that follow the header on the wire: the data section
    /// plus its checksum.
    pub fn length_to_read(&self) -> usize {
        self.data_length as usize + CHECKSUM_SIZE
    }
}

/// Decode the fixed-size frame header.
pub fn decode_frame_header(buf: &[u8]) -> Result<FrameHeader, ScomError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Err(ScomError::FrameTooShort {
            got: buf.len(),
            need: FRAME_HEADER_SIZE,
        });
    }
    if buf[0] != FRAME_START_BYTE {
        return Err(ScomError::InvalidStartByte(buf[0]));
    }
    // The checksum covers everything between the start byte and itself.
    verify_checksum(&buf[1..FRAME_HEADER_SIZE - CHECKSUM_SIZE], &buf[FRAME_HEADER_SIZE - CHECKSUM_SIZE..FRAME_HEADER_SIZE])?;

    let mut cursor = &buf[1..];
    let flags = cursor.get_u8();
    let src_addr = cursor.get_u32_le();
    let dst_addr = cursor.get_u32_le();
    let data_length = cursor.get_u16_le();

    Ok(FrameHeader {
        flags,
        src_addr,
        dst_addr,
        data_length,
    })
}

/// Decoded frame data section.
///
/// `src_addr` is carried over from the header so callers can validate the
/// response against the request from a single value.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub service_id: u8,
    pub object_type: u16,
    pub object_id: u32,
    pub property_id: u16,
    pub src_addr: u32,
    pub property_data: Bytes,
}

impl Frame {
    /// Interpret the property data as a little-endian f32.
    pub fn value_f32(&self) -> Result<f32, ScomError> {
        if self.property_data.len() != 4 {
            return Err(ScomError::InvalidValueLength {
                expected: 4,
                got: self.property_data.len(),
            });
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.property_data);
        Ok(f32::from_le_bytes(raw))
    }
}

/// Decode a frame's data section (the `header.length_to_read()` bytes read
/// after the header).
///
/// Responses flagged as errors by the device decode to [`ScomError::Device`]
/// with the device's error code.
pub fn decode_frame(header: &FrameHeader, buf: &[u8]) -> Result<Frame, ScomError> {
    let need = header.length_to_read();
    if buf.len() != need {
        return Err(ScomError::LengthMismatch {
            got: buf.len(),
            need,
        });
    }
    let (payload, received_cksum) = buf.split_at(buf.len() - CHECKSUM_SIZE);
    verify_checksum(payload, received_cksum)?;

    if payload.len() < FRAME_DATA_FIXED_SIZE {
        return Err(ScomError::FrameTooShort {
            got: payload.len(),
            need: FRAME_DATA_FIXED_SIZE,
        });
    }

    let mut cursor = payload;
    let service_flags = cursor.get_u8();
    let service_id = cursor.get_u8();
    let object_type = cursor.get_u16_le();
    let object_id = cursor.get_u32_le();
    let property_id = cursor.get_u16_le();

    if service_flags & SERVICE_FLAG_ERROR != 0 {
        // Error responses carry a 2-byte error code as property data.
        let code = if cursor.remaining() >= 2 {
            cursor.get_u16_le()
        } else {
            0
        };
        return Err(ScomError::Device(code));
    }

    Ok(Frame {
        service_id,
        object_type,
        object_id,
        property_id,
        src_addr: header.src_addr,
        property_data: Bytes::copy_from_slice(cursor),
    })
}

fn encode_frame(
    src_addr: u32,
    dst_addr: u32,
    service_flags: u8,
    service_id: u8,
    object_type: u16,
    object_id: u32,
    property_id: u16,
    property_data: &[u8],
) -> Vec<u8> {
    let data_length = (FRAME_DATA_FIXED_SIZE + property_data.len()) as u16;

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + data_length as usize + CHECKSUM_SIZE);
    frame.put_u8(FRAME_START_BYTE);
    frame.put_u8(0x00); // header flags
    frame.put_u32_le(src_addr);
    frame.put_u32_le(dst_addr);
    frame.put_u16_le(data_length);
    let header_cksum = checksum(&frame[1..]);
    frame.put_slice(&header_cksum);

    let data_start = frame.len();
    frame.put_u8(service_flags);
    frame.put_u8(service_id);
    frame.put_u16_le(object_type);
    frame.put_u32_le(object_id);
    frame.put_u16_le(property_id);
    frame.put_slice(property_data);
    let data_cksum = checksum(&frame[data_start..]);
    frame.put_slice(&data_cksum);

    frame.to_vec()
}

/// Encode a request for the current value of a user-information object.
pub fn encode_read_user_info(dst_addr: u32, object_id: u32) -> Result<Vec<u8>, ScomError> {
    if object_id == 0 {
        return Err(ScomError::InvalidObjectId(object_id));
    }
    Ok(encode_frame(
        GATEWAY_SRC_ADDR,
        dst_addr,
        0x00,
        SERVICE_READ_PROPERTY,
        OBJECT_TYPE_USER_INFO,
        object_id,
        PROPERTY_USER_INFO_VALUE,
        &[],
    ))
}

/// Encode a write of a u32 into a parameter object's unsaved (QSP) value.
///
/// Signal parameters are triggered by writing a dummy value.
pub fn encode_write_parameter_u32(
    dst_addr: u32,
    object_id: u32,
    value: u32,
) -> Result<Vec<u8>, ScomError> {
    if object_id == 0 {
        return Err(ScomError::InvalidObjectId(object_id));
    }
    Ok(encode_frame(
        GATEWAY_SRC_ADDR,
        dst_addr,
        0x00,
        SERVICE_WRITE_PROPERTY,
        OBJECT_TYPE_PARAMETER,
        object_id,
        PROPERTY_PARAMETER_VALUE_QSP,
        &value.to_le_bytes(),
    ))
}

/// Encode a full user-info read response as a device would produce it.
///
/// Intended for simulators and protocol tests; the service itself only
/// decodes responses.
pub fn encode_user_info_response(src_addr: u32, object_id: u32, value: f32) -> Vec<u8> {
    encode_frame(
        src_addr,
        GATEWAY_SRC_ADDR,
        SERVICE_FLAG_RESPONSE,
        SERVICE_READ_PROPERTY,
        OBJECT_TYPE_USER_INFO,
        object_id,
        PROPERTY_USER_INFO_VALUE,
        &value.to_le_bytes(),
    )
}

/// Encode a full error response carrying a device error code.
///
/// Intended for simulators and protocol tests.
pub fn encode_error_response(src_addr: u32, object_id: u32, code: u16) -> Vec<u8> {
    encode_frame(
        src_addr,
        GATEWAY_SRC_ADDR,
        SERVICE_FLAG_RESPONSE | SERVICE_FLAG_ERROR,
        SERVICE_READ_PROPERTY,
        OBJECT_TYPE_USER_INFO,
        object_id,
        PROPERTY_USER_INFO_VALUE,
        &code.to_le_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_accumulates_and_wraps() {
        assert_eq!(checksum(&[]), [0xFF, 0x00]);
        assert_eq!(checksum(&[0x00]), [0xFF, 0xFF]);
        // 0xFF + 0x01 wraps A to 0x00.
        assert_eq!(checksum(&[0x01, 0x02]), [0x02, 0x02]);
    }

    #[test]
    fn read_request_header_decodes() {
        let request = encode_read_user_info(101, 3137).unwrap();
        assert_eq!(request.len(), FRAME_HEADER_SIZE + FRAME_DATA_FIXED_SIZE + CHECKSUM_SIZE);

        let header = decode_frame_header(&request[..FRAME_HEADER_SIZE]).unwrap();
        assert_eq!(header.src_addr, GATEWAY_SRC_ADDR);
        assert_eq!(header.dst_addr, 101);
        assert_eq!(header.data_length as usize, FRAME_DATA_FIXED_SIZE);
        assert_eq!(header.length_to_read(), FRAME_DATA_FIXED_SIZE + CHECKSUM_SIZE);
    }

    #[test]
    fn response_decodes_with_echoed_fields() {
        let response = encode_user_info_response(101, 3137, 1.5);
        let header = decode_frame_header(&response[..FRAME_HEADER_SIZE]).unwrap();
        let frame = decode_frame(&header, &response[FRAME_HEADER_SIZE..]).unwrap();

        assert_eq!(frame.service_id, SERVICE_READ_PROPERTY);
        assert_eq!(frame.object_type, OBJECT_TYPE_USER_INFO);
        assert_eq!(frame.object_id, 3137);
        assert_eq!(frame.property_id, PROPERTY_USER_INFO_VALUE);
        assert_eq!(frame.src_addr, 101);
        assert_eq!(frame.value_f32().unwrap(), 1.5);
    }

    #[test]
    fn corrupted_header_is_rejected() {
        let mut request = encode_read_user_info(101, 3137).unwrap();
        request[3] ^= 0xFF; // src_addr byte
        assert!(matches!(
            decode_frame_header(&request[..FRAME_HEADER_SIZE]),
            Err(ScomError::ChecksumMismatch { .. })
        ));

        request[0] = 0x55;
        assert_eq!(
            decode_frame_header(&request[..FRAME_HEADER_SIZE]),
            Err(ScomError::InvalidStartByte(0x55))
        );
    }

    #[test]
    fn corrupted_data_is_rejected() {
        let mut response = encode_user_info_response(101, 3137, 1.5);
        let last = response.len() - 1;
        response[last] ^= 0x01;
        let header = decode_frame_header(&response[..FRAME_HEADER_SIZE]).unwrap();
        assert!(matches!(
            decode_frame(&header, &response[FRAME_HEADER_SIZE..]),
            Err(ScomError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn device_error_surfaces_code() {
        let response = encode_error_response(101, 3137, 0x0016);
        let header = decode_frame_header(&response[..FRAME_HEADER_SIZE]).unwrap();
        assert_eq!(
            decode_frame(&header, &response[FRAME_HEADER_SIZE..]),
            Err(ScomError::Device(0x0016))
        );
    }

    #[test]
    fn zero_object_id_is_not_encodable() {
        assert_eq!(
            encode_read_user_info(101, 0),
            Err(ScomError::InvalidObjectId(0))
        );
    }

    #[test]
    fn short_value_is_rejected() {
        let frame = Frame {
            service_id: SERVICE_READ_PROPERTY,
            object_type: OBJECT_TYPE_USER_INFO,
            object_id: 3137,
            property_id: PROPERTY_USER_INFO_VALUE,
            src_addr: 101,
            property_data: Bytes::from_static(&[0x01, 0x02]),
        };
        assert_eq!(
            frame.value_f32(),
            Err(ScomError::InvalidValueLength { expected: 4, got: 2 })
        );
    }
}
