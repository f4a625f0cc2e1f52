//! Bidirectional translation between raw A2S datagram bytes and the tagged
//! message types of spec §3.

pub mod fields;
mod messages;

pub use messages::{
    decode_header, decode_request, decode_response, wrap_header, FragmentHeader,
    GetChallengeResponse, InfoRequest, InfoResponse, PlayerEntry, PlayersRequest,
    PlayersResponse, Request, Response, RulesRequest, RulesResponse, NO_SPLIT, SPLIT,
};
