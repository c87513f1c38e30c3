//! `replay`: run a client over the loopback and feed it a script.
//!
//! A script seeds the loopback (local user, friends, apps) and then lists
//! steps. After each step the pipe is drained and every notification the
//! client published is printed, tagged with the step number.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use friendlink::{
    AppChange, AppEvent, AppId, AppState, ChatEntryType, Client, DispatchError, Error,
    FriendChange, FriendEvent, LoopbackClient, MessageEvent, PersonaState, RawCallback,
    Subscription, UserChange, UserEvent, UserId,
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::ReplayArgs;
use super::config::Config;
use super::decode::parse_hex;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Script {
    me: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "online")]
    state: String,
    #[serde(default)]
    friends: Vec<SeedFriend>,
    #[serde(default)]
    apps: Vec<SeedApp>,
    #[serde(default)]
    steps: Vec<Step>,
}

fn online() -> String {
    "online".into()
}

#[derive(Debug, Deserialize)]
struct SeedFriend {
    id: u64,
    name: String,
    #[serde(default = "online")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct SeedApp {
    id: u32,
    state: u32,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    AddFriend { id: u64, name: String },
    RemoveFriend { id: u64 },
    FriendState { id: u64, state: String },
    FriendName { id: u64, name: String },
    Profile { id: u64 },
    Chat {
        from: u64,
        #[serde(default = "chat")]
        kind: String,
        text: String,
    },
    Send {
        to: u64,
        #[serde(default = "chat")]
        kind: String,
        text: String,
    },
    Nickname { id: u64, nickname: Option<String> },
    MyState { state: String },
    MyName { name: String },
    AppState { id: u32, state: u32 },
    AppData { id: u32, key: String, value: String },
    RemoveApp { id: u32 },
    Raw { id: i32, hex: String },
    Refresh {
        #[serde(default)]
        force: bool,
    },
    Sleep { ms: u64 },
}

fn chat() -> String {
    "chat".into()
}

fn parse_state(s: &str) -> friendlink::Result<PersonaState> {
    Ok(match s.to_ascii_lowercase().replace(['_', '-', ' '], "").as_str() {
        "offline" => PersonaState::Offline,
        "online" => PersonaState::Online,
        "busy" => PersonaState::Busy,
        "away" => PersonaState::Away,
        "snooze" => PersonaState::Snooze,
        "lookingtotrade" => PersonaState::LookingToTrade,
        "lookingtoplay" => PersonaState::LookingToPlay,
        _ => return Err(Error::InvalidArgument(format!("unknown persona state: {s}"))),
    })
}

fn parse_kind(s: &str) -> friendlink::Result<ChatEntryType> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "chat" | "msg" => ChatEntryType::ChatMsg,
        "typing" => ChatEntryType::Typing,
        "invite" | "invite_game" => ChatEntryType::InviteGame,
        "emote" => ChatEntryType::Emote,
        "lobby" | "lobby_game_start" => ChatEntryType::LobbyGameStart,
        "left" | "left_conversation" => ChatEntryType::LeftConversation,
        _ => return Err(Error::InvalidArgument(format!("unknown chat entry kind: {s}"))),
    })
}

/// Every stream the replay prints.
struct Streams {
    user: Subscription<UserEvent>,
    friends: Subscription<FriendEvent>,
    apps: Subscription<AppEvent>,
    messages: Subscription<MessageEvent>,
    errors: Subscription<DispatchError>,
}

impl Streams {
    fn open(client: &Client) -> Self {
        Self {
            user: client.local_user().subscribe(),
            friends: client.friends().subscribe(),
            apps: client.apps().subscribe(),
            messages: client.messages(),
            errors: client.dispatch_errors(),
        }
    }

    /// Drain everything queued, in stream order.
    fn drain(&self) -> Vec<Value> {
        let mut out = Vec::new();
        out.extend(self.user.drain().iter().map(user_line));
        // Message changes are printed from the client-wide stream.
        out.extend(
            self.friends
                .drain()
                .iter()
                .filter(|e| !matches!(e.change, FriendChange::Message(_)))
                .map(friend_line),
        );
        out.extend(self.messages.drain().iter().map(message_line));
        out.extend(self.apps.drain().iter().map(app_line));
        out.extend(self.errors.drain().iter().map(error_line));
        out
    }
}

fn user_line(e: &UserEvent) -> Value {
    let (change, value) = match &e.change {
        UserChange::Name(n) => ("name", json!(n)),
        UserChange::State(s) => ("state", json!(s.text())),
    };
    json!({ "stream": "user", "id": e.id.0, "change": change, "value": value })
}

fn friend_line(e: &FriendEvent) -> Value {
    let (change, value) = match &e.change {
        FriendChange::Added => ("added", Value::Null),
        FriendChange::Removed => ("removed", Value::Null),
        FriendChange::Name(n) => ("name", json!(n)),
        FriendChange::Nickname(n) => ("nickname", json!(n)),
        FriendChange::State(s) => ("state", json!(s.text())),
        FriendChange::Online(o) => ("online", json!(o)),
        FriendChange::Message(m) => ("message", json!(m.message.content)),
    };
    json!({ "stream": "friends", "id": e.id.0, "change": change, "value": value })
}

fn message_line(e: &MessageEvent) -> Value {
    json!({
        "stream": "messages",
        "scope": format!("{:?}", e.scope),
        "direction": format!("{:?}", e.direction),
        "with": e.counterpart().0,
        "kind": format!("{:?}", e.message.kind),
        "content": e.message.content,
    })
}

fn app_line(e: &AppEvent) -> Value {
    let (change, value) = match &e.change {
        AppChange::Added => ("added", Value::Null),
        AppChange::Removed => ("removed", Value::Null),
        AppChange::State(s) => ("state", json!(format!("{s:?}"))),
        AppChange::Installed(b) => ("installed", json!(b)),
        AppChange::Playable(b) => ("playable", json!(b)),
    };
    json!({ "stream": "apps", "id": e.id.0, "change": change, "value": value })
}

fn error_line(e: &DispatchError) -> Value {
    json!({ "stream": "errors", "pipe": e.pipe.0, "id": e.id, "reason": e.reason })
}

fn print(step: usize, line: &Value, as_json: bool) {
    if as_json {
        println!("{}", json!({ "step": step, "event": line }));
        return;
    }
    let stream = line["stream"].as_str().unwrap_or("?");
    let rest: Vec<String> = line
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(k, v)| k.as_str() != "stream" && !v.is_null())
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}={s}"),
            other => format!("{k}={other}"),
        })
        .collect();
    println!("[{step:>3}] {stream:<8} {}", rest.join(" "));
}

/// Block until every record on the client's pipe has been dispatched and
/// released, or `timeout` elapses.
fn settle(native: &LoopbackClient, client: &Client, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if native.pending(client.pipe()) == 0 && native.released() == native.polled() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

fn seed(script: &Script) -> friendlink::Result<Arc<LoopbackClient>> {
    let state = parse_state(&script.state)?;
    let mut native = LoopbackClient::new(UserId(script.me)).with_presence(state);
    if let Some(name) = &script.name {
        native = native.with_persona(name, state);
    }
    for f in &script.friends {
        native.insert_friend(UserId(f.id), &f.name, parse_state(&f.state)?);
    }
    for a in &script.apps {
        let id = AppId(a.id);
        native.insert_app(id, AppState::from_bits_retain(a.state));
        if let Some(name) = &a.name {
            native.set_app_data(id, "name", name);
        }
    }
    Ok(Arc::new(native))
}

fn apply(step: &Step, native: &LoopbackClient, client: &Client) -> friendlink::Result<()> {
    match step {
        Step::AddFriend { id, name } => native.add_friend(UserId(*id), name),
        Step::RemoveFriend { id } => native.remove_friend(UserId(*id)),
        Step::FriendState { id, state } => native.set_friend_state(UserId(*id), parse_state(state)?),
        Step::FriendName { id, name } => native.set_friend_name(UserId(*id), name),
        Step::Profile { id } => native.profile_loaded(UserId(*id)),
        Step::Chat { from, kind, text } => {
            native.deliver_chat(UserId(*from), parse_kind(kind)?, text);
        }
        Step::Send { to, kind, text } => {
            client.send_message(UserId(*to), text, parse_kind(kind)?)?;
        }
        Step::Nickname { id, nickname } => {
            let friend = client
                .friends()
                .get(UserId(*id))
                .ok_or_else(|| Error::InvalidArgument(format!("{id} is not a friend")))?;
            friend.set_nickname(nickname.as_deref())?;
        }
        Step::MyState { state } => client.local_user().set_state(parse_state(state)?)?,
        Step::MyName { name } => client.local_user().set_name(name)?,
        Step::AppState { id, state } => {
            native.set_app_state(AppId(*id), AppState::from_bits_retain(*state));
        }
        Step::AppData { id, key, value } => native.set_app_data(AppId(*id), key, value),
        Step::RemoveApp { id } => native.remove_app(AppId(*id)),
        Step::Raw { id, hex } => native.push(RawCallback::new(*id, parse_hex(hex)?)),
        Step::Refresh { force } => {
            client.friends().refresh(*force);
            client.apps().refresh(*force);
        }
        Step::Sleep { ms } => thread::sleep(Duration::from_millis(*ms)),
    }
    Ok(())
}

pub fn run(args: &ReplayArgs, cfg: &Config) -> friendlink::Result<()> {
    let text = fs::read_to_string(&args.script).map_err(|e| {
        Error::InvalidArgument(format!("read {}: {e}", args.script.display()))
    })?;
    let script: Script = serde_json::from_str(&text)
        .map_err(|e| Error::InvalidArgument(format!("parse script: {e}")))?;

    let cfg = Config {
        history_capacity: args.history_capacity.unwrap_or(cfg.history_capacity),
        poll_interval_ms: args.poll_interval_ms.unwrap_or(cfg.poll_interval_ms),
        stop_timeout_ms: args.stop_timeout_ms.unwrap_or(cfg.stop_timeout_ms),
        log: cfg.log.clone(),
    };
    let settle_timeout = Duration::from_millis(cfg.stop_timeout_ms);

    let native = seed(&script)?;
    let client = cfg.builder().build(native.clone())?;
    let streams = Streams::open(&client);
    println!(
        "user {} ({}), {} friends, {} apps",
        client.local_user().id(),
        client.local_user().name().unwrap_or_default(),
        client.friends().len(),
        client.apps().len(),
    );

    for (n, step) in script.steps.iter().enumerate() {
        let n = n + 1;
        tracing::debug!(step = n, ?step, "applying step");
        apply(step, &native, &client)?;
        if !settle(&native, &client, settle_timeout) {
            tracing::warn!(step = n, "pipe did not drain in time");
        }
        for line in streams.drain() {
            print(n, &line, args.json);
        }
    }

    let outcome = client.shutdown();
    tracing::info!(?outcome, "replay finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_steps_parse() {
        let script: Script = serde_json::from_str(
            r#"{
                "me": 1,
                "friends": [{ "id": 2, "name": "alyx" }],
                "steps": [
                    { "op": "chat", "from": 2, "text": "hi" },
                    { "op": "friend_state", "id": 2, "state": "looking_to_play" },
                    { "op": "refresh", "force": true }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(script.steps.len(), 3);
        assert!(matches!(script.steps[2], Step::Refresh { force: true }));
        assert_eq!(parse_state("looking_to_play").unwrap(), PersonaState::LookingToPlay);
        assert!(parse_kind("shout").is_err());
    }

    #[test]
    fn presence_is_seeded_without_a_name() {
        let script: Script = serde_json::from_str(r#"{ "me": 1, "state": "away" }"#).unwrap();
        let native = seed(&script).unwrap();
        let client = Config::default().builder().build(native.clone()).unwrap();
        assert_eq!(client.local_user().state(), PersonaState::Away);
        assert_eq!(client.local_user().name(), None);
        client.shutdown();
    }

    #[test]
    fn replay_prints_friend_and_message_events() {
        let script: Script = serde_json::from_str(
            r#"{ "me": 1, "name": "gordon",
                 "friends": [{ "id": 2, "name": "alyx" }],
                 "steps": [] }"#,
        )
        .unwrap();
        let native = seed(&script).unwrap();
        let client = Config::default().builder().build(native.clone()).unwrap();
        let streams = Streams::open(&client);

        apply(
            &Step::Chat { from: 2, kind: "chat".into(), text: "hi".into() },
            &native,
            &client,
        )
        .unwrap();
        assert!(settle(&native, &client, Duration::from_secs(2)));

        let lines = streams.drain();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["scope"], "Any");
        assert_eq!(lines[1]["scope"], "Chat");
        assert_eq!(lines[1]["content"], "hi");
    }
}
