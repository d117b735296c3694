//! Request executor
//!
//! Drives one request/response transaction per polled parameter: encode the
//! request, write it, read the fixed-size header, bound and read the payload,
//! decode, and validate that the response echoes what was asked. Owns the
//! retry policy; the scheduler above only ever sees a [`TransactionOutcome`].

use scom_proto::{
    decode_frame, decode_frame_header, encode_read_user_info, FRAME_HEADER_SIZE, MAX_FRAME_SIZE,
    OBJECT_TYPE_USER_INFO, PROPERTY_USER_INFO_VALUE, SERVICE_READ_PROPERTY,
};
use tracing::{debug, warn};

use crate::transport::SerialLink;

/// Upper bound on send/validate attempts for one transaction.
pub const MAX_ATTEMPTS: u32 = 3;

/// Why a transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The codec rejected the request inputs; no bytes were exchanged.
    EncodeError,
    /// The driver accepted fewer bytes than the request needed.
    WriteShortfall,
    /// No response header arrived within the idle window.
    HeaderTimeout,
    /// The header bytes did not decode.
    HeaderDecodeError,
    /// The header announced an implausible payload length.
    InvalidLength,
    /// The payload stopped arriving before the announced length.
    PayloadTimeout,
    /// The payload bytes did not decode.
    PayloadDecodeError,
    /// A well-formed response answered a different request.
    ResponseMismatch,
}

impl FailureKind {
    /// Whether this failure says anything about the serial link itself.
    /// Encode failures never touched the wire.
    pub fn is_link_evidence(&self) -> bool {
        !matches!(self, FailureKind::EncodeError)
    }
}

/// Result of polling one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransactionOutcome {
    Value(f32),
    Failure(FailureKind),
}

/// Executes transactions over a single half-duplex link, one at a time.
pub struct RequestExecutor<L> {
    link: L,
}

impl<L: SerialLink> RequestExecutor<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    /// Read the current value of `parameter_id` from the device at
    /// `device_address`.
    ///
    /// Retried (after an input flush) only on short writes and response
    /// mismatches: those leave the link alive but out of step, and asking
    /// again can succeed. A zero-byte header read means the device is absent
    /// and would time out identically on every retry, so it fails the
    /// transaction immediately. Decode-class failures flush the input to
    /// resynchronize framing and end the transaction.
    pub async fn read_parameter(
        &mut self,
        device_address: u32,
        parameter_id: u32,
    ) -> TransactionOutcome {
        let mut last_failure = None;

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                debug!(
                    "retry {}/{}: reading param {} from addr {}",
                    attempt, MAX_ATTEMPTS, parameter_id, device_address
                );
            }

            let request = match encode_read_user_info(device_address, parameter_id) {
                Ok(request) => request,
                Err(e) => {
                    warn!(
                        "failed to encode request for param {} at addr {}: {}",
                        parameter_id, device_address, e
                    );
                    return TransactionOutcome::Failure(FailureKind::EncodeError);
                }
            };

            match self.link.write(&request).await {
                Ok(written) if written == request.len() => {}
                Ok(written) => {
                    warn!("serial write failed: sent {} of {} bytes", written, request.len());
                    let _ = self.link.flush_input().await;
                    last_failure = Some(FailureKind::WriteShortfall);
                    continue;
                }
                Err(e) => {
                    warn!("serial write failed: {}", e);
                    let _ = self.link.flush_input().await;
                    last_failure = Some(FailureKind::WriteShortfall);
                    continue;
                }
            }

            let mut header_buf = [0u8; FRAME_HEADER_SIZE];
            let got = match self.link.read(&mut header_buf).await {
                Ok(got) => got,
                Err(e) => {
                    warn!("serial header read failed: {}", e);
                    let _ = self.link.flush_input().await;
                    return TransactionOutcome::Failure(FailureKind::HeaderTimeout);
                }
            };
            if got == 0 {
                warn!("serial timeout: no header received (device disconnected?)");
                let _ = self.link.flush_input().await;
                return TransactionOutcome::Failure(FailureKind::HeaderTimeout);
            }
            if got < FRAME_HEADER_SIZE {
                warn!("serial header read short: got {} of {} bytes", got, FRAME_HEADER_SIZE);
                let _ = self.link.flush_input().await;
                return TransactionOutcome::Failure(FailureKind::HeaderTimeout);
            }

            let header = match decode_frame_header(&header_buf) {
                Ok(header) => header,
                Err(e) => {
                    warn!("header decode failed: {}", e);
                    let _ = self.link.flush_input().await;
                    return TransactionOutcome::Failure(FailureKind::HeaderDecodeError);
                }
            };

            // Bound the read before trusting a possibly corrupted length field.
            let payload_len = header.length_to_read();
            if header.data_length == 0 || payload_len > MAX_FRAME_SIZE {
                warn!("implausible payload length {} announced by header", payload_len);
                let _ = self.link.flush_input().await;
                return TransactionOutcome::Failure(FailureKind::InvalidLength);
            }

            let mut payload = vec![0u8; payload_len];
            let got = match self.link.read(&mut payload).await {
                Ok(got) => got,
                Err(e) => {
                    warn!("serial payload read failed: {}", e);
                    let _ = self.link.flush_input().await;
                    return TransactionOutcome::Failure(FailureKind::PayloadTimeout);
                }
            };
            if got < payload_len {
                warn!("serial timeout: got {} of {} payload bytes", got, payload_len);
                let _ = self.link.flush_input().await;
                return TransactionOutcome::Failure(FailureKind::PayloadTimeout);
            }

            let frame = match decode_frame(&header, &payload) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("frame decode failed: {}", e);
                    let _ = self.link.flush_input().await;
                    return TransactionOutcome::Failure(FailureKind::PayloadDecodeError);
                }
            };

            // A stale or cross-talk response is recoverable: flush and re-ask.
            if frame.service_id != SERVICE_READ_PROPERTY
                || frame.object_type != OBJECT_TYPE_USER_INFO
                || frame.property_id != PROPERTY_USER_INFO_VALUE
                || frame.object_id != parameter_id
                || frame.src_addr != device_address
            {
                warn!(
                    "response mismatch (attempt {}/{}): expected param={} addr={}, got obj_id={} addr={}",
                    attempt, MAX_ATTEMPTS, parameter_id, device_address, frame.object_id, frame.src_addr
                );
                let _ = self.link.flush_input().await;
                last_failure = Some(FailureKind::ResponseMismatch);
                continue;
            }

            match frame.value_f32() {
                Ok(value) => return TransactionOutcome::Value(value),
                Err(e) => {
                    warn!("response value malformed: {}", e);
                    let _ = self.link.flush_input().await;
                    return TransactionOutcome::Failure(FailureKind::PayloadDecodeError);
                }
            }
        }

        TransactionOutcome::Failure(last_failure.unwrap_or(FailureKind::ResponseMismatch))
    }
}
