//! `decode`: one raw record to its typed payload.

use friendlink::callback::{
    AppEventStateChange, FriendAdded, FriendChatMsg, FriendProfileInfoResponse,
    PersonaStateChange,
};
use friendlink::{CallbackId, CallbackPayload, Error};

/// Parse hex with optional `0x` prefix and embedded whitespace.
pub fn parse_hex(text: &str) -> friendlink::Result<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    let digits = compact.strip_prefix("0x").unwrap_or(&compact);
    hex::decode(digits).map_err(|e| Error::InvalidArgument(format!("invalid hex: {e}")))
}

/// Render the payload of a record with id `id`.
pub fn describe(id: CallbackId, raw: &[u8]) -> friendlink::Result<String> {
    fn show<T: CallbackPayload + std::fmt::Debug>(raw: &[u8]) -> friendlink::Result<String> {
        T::decode(raw).map(|p| format!("{p:#?}"))
    }
    match id {
        PersonaStateChange::ID => show::<PersonaStateChange>(raw),
        FriendChatMsg::ID => show::<FriendChatMsg>(raw),
        FriendAdded::ID => show::<FriendAdded>(raw),
        FriendProfileInfoResponse::ID => show::<FriendProfileInfoResponse>(raw),
        AppEventStateChange::ID => show::<AppEventStateChange>(raw),
        other => Err(Error::InvalidArgument(format!(
            "no payload type for callback {other}"
        ))),
    }
}

pub fn run(id: CallbackId, hex: &str) -> friendlink::Result<()> {
    let raw = parse_hex(hex)?;
    println!("{}", describe(id, &raw)?);
    Ok(())
}
