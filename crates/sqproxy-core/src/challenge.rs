//! The challenge-number handshake used by refresh loops that talk to an
//! upstream requiring `A2S_GETCHALLENGE` (players, rules).
//!
//! Mirrors the original's `send_recv_packet`: send the request, and if the
//! server answers with a bare challenge instead of data, resend the same
//! request carrying that challenge -- without resetting the overall
//! deadline, so a server that keeps rotating challenges eventually times
//! out rather than looping forever.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::codec::{decode_response, Request, Response};
use crate::error::{RefreshError, TransportError};
use crate::transport::DatagramTransport;

/// `A2S_GETCHALLENGE` requests carry `-1` to mean "issue me a challenge".
/// Compared with `==`, not as a bit pattern -- any other negative value is
/// a real (if unusual) challenge number, not a sentinel.
pub const NO_CHALLENGE: i32 = -1;

/// Run the send/maybe-retry-with-challenge dialog for one request, against
/// a socket already connected to the upstream. Returns the first non-bare-
/// challenge response together with the verbatim bytes it was decoded
/// from -- callers cache the raw bytes, never a re-encoded copy, so a
/// server's response reaches clients byte-for-byte as received.
pub fn send_recv_request(
    transport: &DatagramTransport,
    mut request: Request,
    timeout: Duration,
) -> Result<(Response, Vec<u8>), RefreshError> {
    let deadline = Instant::now() + timeout;
    let mut last_challenge = initial_challenge(&request);

    loop {
        transport
            .send_packet(&request.encode(), None)
            .map_err(RefreshError::from)?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RefreshError::Timeout);
        }

        let (packet, _addr) = match transport.recv_packet(remaining) {
            Ok(v) => v,
            Err(TransportError::Timeout) => return Err(RefreshError::Timeout),
            Err(err) => return Err(RefreshError::from(err)),
        };

        match decode_response(&packet) {
            Some(Response::Challenge(challenge_response)) => {
                let challenge = challenge_response.challenge;
                if let Some(previous) = last_challenge {
                    if previous != NO_CHALLENGE && previous != challenge {
                        warn!(previous, challenge, "upstream rotated challenge mid-dialog");
                    }
                }
                last_challenge = Some(challenge);
                request = request.with_challenge(challenge);
            }
            Some(response) => return Ok((response, packet)),
            None => continue,
        }
    }
}

fn initial_challenge(request: &Request) -> Option<i32> {
    match request {
        Request::Players(req) => Some(req.challenge),
        Request::Rules(req) => Some(req.challenge),
        Request::Info(req) => req.challenge,
    }
}
