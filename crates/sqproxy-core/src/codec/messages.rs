//! A2S message kinds: the tagged variants of spec §3, plus their encoders
//! and decoders.
//!
//! Every on-wire packet starts with a 4-byte header (`NO_SPLIT` or `SPLIT`).
//! The transport layer (see `crate::transport`) is responsible for
//! recognising `SPLIT` and reassembling fragments; by the time bytes reach
//! this module they are always a full logical packet -- header included.

use super::fields::{
    decode_f32_le, decode_i16_le, decode_i32_le, decode_u8, decode_cstring, encode_cstring, require,
};
use crate::error::CodecError;

pub const NO_SPLIT: i32 = -1;
pub const SPLIT: i32 = -2;

pub const TAG_INFO_REQUEST: u8 = 0x54;
pub const TAG_INFO_RESPONSE: u8 = 0x49;
pub const TAG_PLAYERS_REQUEST: u8 = 0x55;
pub const TAG_PLAYERS_RESPONSE: u8 = 0x44;
pub const TAG_RULES_REQUEST: u8 = 0x56;
pub const TAG_RULES_RESPONSE: u8 = 0x45;
pub const TAG_GET_CHALLENGE_RESPONSE: u8 = 0x41;

const DEFAULT_INFO_PAYLOAD: &str = "Source Engine Query";

/// Strip and validate the 4-byte packet header, returning the remaining body.
pub fn decode_header(buf: &[u8]) -> Result<(i32, &[u8]), CodecError> {
    let (split, rest) = decode_i32_le(buf)?;
    require(split == NO_SPLIT || split == SPLIT, "split", split)?;
    Ok((split, rest))
}

/// Prepend the 4-byte packet header to an already-encoded body.
///
/// `split_header = false` (the default call site) emits `NO_SPLIT`; passing
/// `true` emits `SPLIT` and is used only by the fragment framer in
/// `crate::transport`, which re-wraps each fragment with its own header.
pub fn wrap_header(body: Vec<u8>, split_header: bool) -> Vec<u8> {
    let split = if split_header { SPLIT } else { NO_SPLIT };
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&split.to_le_bytes());
    out.extend(body);
    out
}

/// Fragment header fields, used only by the datagram transport.
#[derive(Debug, Clone, Copy)]
pub struct FragmentHeader {
    pub message_id: i32,
    pub fragment_count: u8,
    pub fragment_id: u8,
    pub mtu: i16,
}

impl FragmentHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&self.message_id.to_le_bytes());
        out.push(self.fragment_count);
        out.push(self.fragment_id);
        out.extend_from_slice(&self.mtu.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let (message_id, rest) = decode_i32_le(buf)?;
        let (fragment_count, rest) = decode_u8(rest)?;
        let (fragment_id, rest) = decode_u8(rest)?;
        let (mtu, rest) = decode_i16_le(rest)?;
        Ok((
            FragmentHeader {
                message_id,
                fragment_count,
                fragment_id,
                mtu,
            },
            rest,
        ))
    }

    /// High bit of `message_id` (bit 16, not the sign bit -- see the
    /// original's `1 << 16`) flags a compressed payload. We never
    /// decompress; this is observability only (see SPEC_FULL §4.2).
    pub fn is_compressed(&self) -> bool {
        (self.message_id & (1 << 16)) != 0
    }
}

/// Decode a bounded, best-effort array: stop at `max_count` elements or the
/// first element that doesn't fully fit in the remaining buffer, whichever
/// comes first. Never returns a partially-decoded element.
fn decode_array<'a, T>(
    mut buf: &'a [u8],
    max_count: usize,
    decode_one: impl Fn(&'a [u8]) -> Result<(T, &'a [u8]), CodecError>,
) -> (Vec<T>, &'a [u8]) {
    let mut items = Vec::new();
    for _ in 0..max_count {
        match decode_one(buf) {
            Ok((item, rest)) => {
                items.push(item);
                buf = rest;
            }
            Err(_) => break,
        }
    }
    (items, buf)
}

// ---------------------------------------------------------------------
// A2S_INFO
// ---------------------------------------------------------------------

/// `A2S_INFO` request. `challenge` is only present for the challenge-aware
/// variant (historically "InfoRequestV2"); encoding with `challenge = None`
/// produces byte-identical output to the challenge-less original request.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoRequest {
    pub payload: String,
    pub challenge: Option<i32>,
}

impl Default for InfoRequest {
    fn default() -> Self {
        InfoRequest {
            payload: DEFAULT_INFO_PAYLOAD.to_string(),
            challenge: None,
        }
    }
}

impl InfoRequest {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = vec![TAG_INFO_REQUEST];
        encode_cstring(&self.payload, &mut out);
        if let Some(challenge) = self.challenge {
            out.extend_from_slice(&challenge.to_le_bytes());
        }
        out
    }

    pub fn decode_body(buf: &[u8]) -> Result<Self, CodecError> {
        let (tag, rest) = decode_u8(buf)?;
        require(tag == TAG_INFO_REQUEST, "request_type", tag)?;
        let (payload, rest) = decode_cstring(rest)?;
        let challenge = decode_i32_le(rest).ok().map(|(value, _)| value);
        Ok(InfoRequest { payload, challenge })
    }
}

/// `A2S_INFO` response.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoResponse {
    pub protocol: u8,
    pub server_name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: i16,
    pub player_count: u8,
    pub max_players: u8,
    pub bot_count: u8,
    pub server_type: u8,
    pub platform: u8,
    pub password_protected: u8,
    pub vac_enabled: u8,
    pub version: String,
}

impl InfoResponse {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = vec![TAG_INFO_RESPONSE, self.protocol];
        encode_cstring(&self.server_name, &mut out);
        encode_cstring(&self.map, &mut out);
        encode_cstring(&self.folder, &mut out);
        encode_cstring(&self.game, &mut out);
        out.extend_from_slice(&self.app_id.to_le_bytes());
        out.push(self.player_count);
        out.push(self.max_players);
        out.push(self.bot_count);
        out.push(self.server_type);
        out.push(self.platform);
        out.push(self.password_protected);
        out.push(self.vac_enabled);
        encode_cstring(&self.version, &mut out);
        out
    }

    pub fn decode_body(buf: &[u8]) -> Result<Self, CodecError> {
        let (tag, rest) = decode_u8(buf)?;
        require(tag == TAG_INFO_RESPONSE, "response_type", tag)?;
        let (protocol, rest) = decode_u8(rest)?;
        let (server_name, rest) = decode_cstring(rest)?;
        let (map, rest) = decode_cstring(rest)?;
        let (folder, rest) = decode_cstring(rest)?;
        let (game, rest) = decode_cstring(rest)?;
        let (app_id, rest) = decode_i16_le(rest)?;
        let (player_count, rest) = decode_u8(rest)?;
        let (max_players, rest) = decode_u8(rest)?;
        let (bot_count, rest) = decode_u8(rest)?;
        let (server_type, rest) = decode_u8(rest)?;
        let (platform, rest) = decode_u8(rest)?;
        let (password_protected, rest) = decode_u8(rest)?;
        let (vac_enabled, rest) = decode_u8(rest)?;
        let (version, _rest) = decode_cstring(rest)?;
        Ok(InfoResponse {
            protocol,
            server_name,
            map,
            folder,
            game,
            app_id,
            player_count,
            max_players,
            bot_count,
            server_type,
            platform,
            password_protected,
            vac_enabled,
            version,
        })
    }
}

// ---------------------------------------------------------------------
// A2S_PLAYER
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PlayersRequest {
    pub challenge: i32,
}

impl PlayersRequest {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = vec![TAG_PLAYERS_REQUEST];
        out.extend_from_slice(&self.challenge.to_le_bytes());
        out
    }

    pub fn decode_body(buf: &[u8]) -> Result<Self, CodecError> {
        let (tag, rest) = decode_u8(buf)?;
        require(tag == TAG_PLAYERS_REQUEST, "request_type", tag)?;
        let (challenge, _rest) = decode_i32_le(rest)?;
        Ok(PlayersRequest { challenge })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEntry {
    pub index: u8,
    pub name: String,
    pub score: i32,
    pub duration: f32,
}

impl PlayerEntry {
    fn decode(buf: &[u8]) -> Result<(Self, &[u8]), CodecError> {
        let (index, rest) = decode_u8(buf)?;
        let (name, rest) = decode_cstring(rest)?;
        let (score, rest) = decode_i32_le(rest)?;
        let (duration, rest) = decode_f32_le(rest)?;
        Ok((
            PlayerEntry {
                index,
                name,
                score,
                duration,
            },
            rest,
        ))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.index);
        encode_cstring(&self.name, out);
        out.extend_from_slice(&self.score.to_le_bytes());
        out.extend_from_slice(&self.duration.to_le_bytes());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayersResponse {
    pub players: Vec<PlayerEntry>,
}

impl PlayersResponse {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = vec![TAG_PLAYERS_RESPONSE, self.players.len() as u8];
        for player in &self.players {
            player.encode(&mut out);
        }
        out
    }

    pub fn decode_body(buf: &[u8]) -> Result<Self, CodecError> {
        let (tag, rest) = decode_u8(buf)?;
        require(tag == TAG_PLAYERS_RESPONSE, "response_type", tag)?;
        let (player_count, rest) = decode_u8(rest)?;
        let (players, _rest) = decode_array(rest, player_count as usize, PlayerEntry::decode);
        Ok(PlayersResponse { players })
    }
}

// ---------------------------------------------------------------------
// A2S_RULES
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RulesRequest {
    pub challenge: i32,
}

impl RulesRequest {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = vec![TAG_RULES_REQUEST];
        out.extend_from_slice(&self.challenge.to_le_bytes());
        out
    }

    pub fn decode_body(buf: &[u8]) -> Result<Self, CodecError> {
        let (tag, rest) = decode_u8(buf)?;
        require(tag == TAG_RULES_REQUEST, "request_type", tag)?;
        let (challenge, _rest) = decode_i32_le(rest)?;
        Ok(RulesRequest { challenge })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RulesResponse {
    /// Key/value pairs in wire order. Kept as a `Vec`, not a map: real
    /// servers occasionally send duplicate keys and order can matter to
    /// callers re-forwarding the raw bytes, which we always do anyway.
    pub rules: Vec<(String, String)>,
}

impl RulesResponse {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = vec![TAG_RULES_RESPONSE];
        out.extend_from_slice(&(self.rules.len() as i16).to_le_bytes());
        for (key, value) in &self.rules {
            encode_cstring(key, &mut out);
            encode_cstring(value, &mut out);
        }
        out
    }

    pub fn decode_body(buf: &[u8]) -> Result<Self, CodecError> {
        let (tag, rest) = decode_u8(buf)?;
        require(tag == TAG_RULES_RESPONSE, "response_type", tag)?;
        let (rule_count, rest) = decode_i16_le(rest)?;
        let (rules, _rest) = decode_array(rest, rule_count.max(0) as usize, |buf| {
            let (key, rest) = decode_cstring(buf)?;
            let (value, rest) = decode_cstring(rest)?;
            Ok(((key, value), rest))
        });
        Ok(RulesResponse { rules })
    }
}

// ---------------------------------------------------------------------
// Challenge exchange
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetChallengeResponse {
    pub challenge: i32,
}

impl GetChallengeResponse {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = vec![TAG_GET_CHALLENGE_RESPONSE];
        out.extend_from_slice(&self.challenge.to_le_bytes());
        out
    }

    pub fn decode_body(buf: &[u8]) -> Result<Self, CodecError> {
        let (tag, rest) = decode_u8(buf)?;
        require(tag == TAG_GET_CHALLENGE_RESPONSE, "response_type", tag)?;
        let (challenge, _rest) = decode_i32_le(rest)?;
        Ok(GetChallengeResponse { challenge })
    }
}

// ---------------------------------------------------------------------
// Tagged dispatch
// ---------------------------------------------------------------------

/// A request as seen by the client-facing listener.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Info(InfoRequest),
    Players(PlayersRequest),
    Rules(RulesRequest),
}

/// A response as seen by a refresh loop talking to upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Info(InfoResponse),
    Players(PlayersResponse),
    Rules(RulesResponse),
    Challenge(GetChallengeResponse),
}

/// Decode a full packet (header included) into a `Request`.
///
/// Returns `None` for a broken header, a broken body, or an unrecognized
/// tag byte -- all three are "unrecognized packet" at the codec boundary.
pub fn decode_request(packet: &[u8]) -> Option<Request> {
    let (_split, body) = decode_header(packet).ok()?;
    let tag = *body.first()?;
    match tag {
        TAG_INFO_REQUEST => InfoRequest::decode_body(body).ok().map(Request::Info),
        TAG_PLAYERS_REQUEST => PlayersRequest::decode_body(body).ok().map(Request::Players),
        TAG_RULES_REQUEST => RulesRequest::decode_body(body).ok().map(Request::Rules),
        _ => None,
    }
}

/// Decode a full packet (header included) into a `Response`.
pub fn decode_response(packet: &[u8]) -> Option<Response> {
    let (_split, body) = decode_header(packet).ok()?;
    let tag = *body.first()?;
    match tag {
        TAG_INFO_RESPONSE => InfoResponse::decode_body(body).ok().map(Response::Info),
        TAG_PLAYERS_RESPONSE => PlayersResponse::decode_body(body).ok().map(Response::Players),
        TAG_RULES_RESPONSE => RulesResponse::decode_body(body).ok().map(Response::Rules),
        TAG_GET_CHALLENGE_RESPONSE => {
            GetChallengeResponse::decode_body(body).ok().map(Response::Challenge)
        }
        _ => None,
    }
}

impl Request {
    /// Encode a full packet (header included).
    pub fn encode(&self) -> Vec<u8> {
        let body = match self {
            Request::Info(req) => req.encode_body(),
            Request::Players(req) => req.encode_body(),
            Request::Rules(req) => req.encode_body(),
        };
        wrap_header(body, false)
    }

    /// Re-encode this request with a different challenge value, if the
    /// request kind carries one. Used by the challenge dialog helper to
    /// retry with a server-issued challenge without building a new request.
    pub fn with_challenge(&self, challenge: i32) -> Request {
        match self {
            Request::Info(req) => Request::Info(InfoRequest {
                challenge: Some(challenge),
                ..req.clone()
            }),
            Request::Players(_) => Request::Players(PlayersRequest { challenge }),
            Request::Rules(_) => Request::Rules(RulesRequest { challenge }),
        }
    }
}

impl GetChallengeResponse {
    pub fn encode(&self) -> Vec<u8> {
        wrap_header(self.encode_body(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_request_v2_with_no_challenge_matches_plain_info_request() {
        let plain = InfoRequest::default();
        let v2 = InfoRequest {
            challenge: None,
            ..InfoRequest::default()
        };
        assert_eq!(plain.encode_body(), v2.encode_body());
    }

    #[test]
    fn info_request_round_trips_with_challenge() {
        let req = InfoRequest {
            payload: DEFAULT_INFO_PAYLOAD.to_string(),
            challenge: Some(0xBEEF),
        };
        let decoded = InfoRequest::decode_body(&req.encode_body()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn info_request_without_challenge_decodes_to_none() {
        let req = InfoRequest::default();
        let decoded = InfoRequest::decode_body(&req.encode_body()).unwrap();
        assert_eq!(decoded.challenge, None);
    }

    #[test]
    fn players_response_round_trips() {
        let resp = PlayersResponse {
            players: vec![
                PlayerEntry {
                    index: 0,
                    name: "alice".into(),
                    score: 10,
                    duration: 42.5,
                },
                PlayerEntry {
                    index: 1,
                    name: "bob".into(),
                    score: -3,
                    duration: 0.0,
                },
            ],
        };
        let packet = wrap_header(resp.encode_body(), false);
        let decoded = decode_response(&packet).unwrap();
        assert_eq!(decoded, Response::Players(resp));
    }

    #[test]
    fn players_response_truncated_array_keeps_whole_elements_only() {
        let resp = PlayersResponse {
            players: vec![PlayerEntry {
                index: 0,
                name: "alice".into(),
                score: 10,
                duration: 1.0,
            }],
        };
        let mut body = resp.encode_body();
        // Claim two players but only ship bytes for one -- decode must
        // return the one complete element, never a partial second one.
        body[1] = 2;
        let decoded = PlayersResponse::decode_body(&body).unwrap();
        assert_eq!(decoded.players.len(), 1);
    }

    #[test]
    fn rules_response_round_trips() {
        let resp = RulesResponse {
            rules: vec![("sv_gravity".into(), "800".into()), ("mp_timelimit".into(), "30".into())],
        };
        let packet = wrap_header(resp.encode_body(), false);
        assert_eq!(decode_response(&packet).unwrap(), Response::Rules(resp));
    }

    #[test]
    fn header_discipline_no_split() {
        let packet = InfoRequest::default().encode_body();
        let wrapped = wrap_header(packet, false);
        assert_eq!(&wrapped[..4], &(-1i32).to_le_bytes());
    }

    #[test]
    fn header_discipline_split() {
        let wrapped = wrap_header(vec![1, 2, 3], true);
        assert_eq!(&wrapped[..4], &(-2i32).to_le_bytes());
    }

    #[test]
    fn unknown_tag_is_unrecognized() {
        let packet = wrap_header(vec![0x00, 0x00, 0x00, 0x00], false);
        assert!(decode_request(&packet).is_none());
    }

    #[test]
    fn truncated_datagram_never_panics() {
        assert!(decode_request(&[]).is_none());
        assert!(decode_request(&[0xff]).is_none());
        assert!(decode_response(&wrap_header(vec![], false)).is_none());
    }

    #[test]
    fn challenge_response_round_trips() {
        let resp = GetChallengeResponse { challenge: 12345 };
        let packet = resp.encode();
        assert_eq!(decode_response(&packet).unwrap(), Response::Challenge(resp));
    }

    #[test]
    fn info_response_round_trips() {
        let resp = InfoResponse {
            protocol: 17,
            server_name: "My Server".into(),
            map: "de_dust2".into(),
            folder: "csgo".into(),
            game: "Counter-Strike".into(),
            app_id: 730,
            player_count: 5,
            max_players: 10,
            bot_count: 0,
            server_type: b'd',
            platform: b'l',
            password_protected: 0,
            vac_enabled: 1,
            version: "1.0.0.0".into(),
        };
        let packet = wrap_header(resp.encode_body(), false);
        assert_eq!(decode_response(&packet).unwrap(), Response::Info(resp));
    }
}
