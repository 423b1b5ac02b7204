//! The sync message set.

use super::codec::{split_frame, PacketReader, PacketWriter, HEADER_LEN, MAX_FRAME_LEN};
use crate::error::LinkError;
use std::time::Duration;
use world_core::{
    AccountId, Cell, CharacterProfile, GeneratorId, MapDescriptor, MapId, MonsterOrigin,
    MonsterProfile, MonsterSpawn, Role, RoleId, StatusChange, TemplateId,
};

/// Type tags of the AI-sync range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    LoginExchange = 31000,
    LoginExchangeEx = 31001,
    Ping = 31002,
    PlayerLogin = 31003,
    PlayerLogout = 31004,
    SpawnNpc = 31005,
    RoleLogin = 31006,
    RoleStatusFlag = 31007,
    DynaMap = 31008,
    Action = 31009,
    Walk = 31010,
    Interact = 31011,
    QueryRole = 31012,
}

impl MessageType {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for MessageType {
    type Error = LinkError;

    fn try_from(tag: u16) -> Result<Self, Self::Error> {
        Ok(match tag {
            31000 => MessageType::LoginExchange,
            31001 => MessageType::LoginExchangeEx,
            31002 => MessageType::Ping,
            31003 => MessageType::PlayerLogin,
            31004 => MessageType::PlayerLogout,
            31005 => MessageType::SpawnNpc,
            31006 => MessageType::RoleLogin,
            31007 => MessageType::RoleStatusFlag,
            31008 => MessageType::DynaMap,
            31009 => MessageType::Action,
            31010 => MessageType::Walk,
            31011 => MessageType::Interact,
            31012 => MessageType::QueryRole,
            other => return Err(LinkError::Decode(format!("unknown message type {other}"))),
        })
    }
}

/// Outcome of a login exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoginResult {
    Success = 0,
    AlreadySignedIn = 1,
    InvalidPassword = 2,
    InvalidAddress = 3,
    AlreadyBound = 4,
}

impl LoginResult {
    fn from_u8(code: u8) -> Result<Self, LinkError> {
        Ok(match code {
            0 => LoginResult::Success,
            1 => LoginResult::AlreadySignedIn,
            2 => LoginResult::InvalidPassword,
            3 => LoginResult::InvalidAddress,
            4 => LoginResult::AlreadyBound,
            other => return Err(LinkError::Decode(format!("unknown login result {other}"))),
        })
    }
}

/// What the AI process needs to know about a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub id: RoleId,
    pub account: AccountId,
    pub name: String,
    pub level: u16,
    pub hp: u32,
    pub max_hp: u32,
    pub guild: Option<String>,
    pub map: MapId,
    pub cell: Cell,
}

impl PlayerSnapshot {
    /// Captures a character. `None` for anything else.
    pub fn from_role(role: &Role) -> Option<Self> {
        let profile = role.variant::<CharacterProfile>()?;
        Some(Self {
            id: role.id(),
            account: profile.account,
            name: profile.name.clone(),
            level: profile.level,
            hp: profile.hp,
            max_hp: profile.max_hp,
            guild: profile.guild.clone(),
            map: role.map(),
            cell: role.cell(),
        })
    }

    /// Builds the shadow character the AI process keeps for this player.
    pub fn into_shadow(self) -> Role {
        Role::character(
            self.id,
            CharacterProfile {
                account: self.account,
                name: self.name,
                level: self.level,
                hp: self.hp,
                max_hp: self.max_hp,
                guild: self.guild,
                shadow: true,
            },
            self.map,
            self.cell,
        )
    }
}

/// One monster in a SpawnNpc batch or a RoleLogin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnEntry {
    pub id: RoleId,
    pub generator: Option<GeneratorId>,
    pub template: TemplateId,
    pub map: MapId,
    pub cell: Cell,
}

impl SpawnEntry {
    /// Describes a monster. `None` for anything else.
    pub fn from_role(role: &Role) -> Option<Self> {
        let profile = role.variant::<MonsterProfile>()?;
        Some(Self {
            id: role.id(),
            generator: role.generator(),
            template: profile.template,
            map: role.map(),
            cell: role.cell(),
        })
    }

    pub fn to_spawn(&self) -> MonsterSpawn {
        MonsterSpawn {
            id: self.id,
            template: self.template,
            map: self.map,
            cell: self.cell,
            origin: match self.generator {
                Some(generator) => MonsterOrigin::Generator(generator),
                None => MonsterOrigin::Summoned,
            },
        }
    }
}

/// The two SpawnNpc modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnBatch {
    Spawn(Vec<SpawnEntry>),
    Destroy(Vec<RoleId>),
}

impl SpawnBatch {
    pub fn len(&self) -> usize {
        match self {
            SpawnBatch::Spawn(entries) => entries.len(),
            SpawnBatch::Destroy(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most spawn entries one SpawnNpc frame can hold: header, mode byte
    /// and count ahead of the entries.
    pub const fn max_entries_per_frame() -> usize {
        (MAX_FRAME_LEN - HEADER_LEN - 1 - 2) / SPAWN_ENTRY_LEN
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynaMapChange {
    Add(MapDescriptor),
    Remove(MapId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Action,
    Walk,
    Interact,
}

/// A gameplay action routed between the processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub actor: RoleId,
    pub target: Option<RoleId>,
    pub verb: u16,
    pub map: MapId,
    pub cell: Cell,
}

impl ActionRequest {
    /// A walk to the role's current map and cell. A walk naming another map
    /// than the one the receiver has the role on is a map jump.
    pub fn walk(role: &Role) -> Self {
        Self {
            kind: ActionKind::Walk,
            actor: role.id(),
            target: None,
            verb: 0,
            map: role.map(),
            cell: role.cell(),
        }
    }
}

/// Every message the link carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    LoginExchange { username: String, password: String },
    LoginExchangeEx(LoginResult),
    /// `reply_ms` is zero on a request; the responder fills it in and
    /// echoes `origin_ms` unchanged.
    Ping { origin_ms: u64, reply_ms: u64 },
    PlayerLogin(PlayerSnapshot),
    PlayerLogout(RoleId),
    SpawnNpc(SpawnBatch),
    RoleLogin(SpawnEntry),
    RoleStatusFlag(StatusChange),
    DynaMap(DynaMapChange),
    Action(ActionRequest),
    QueryRole(RoleId),
}

/// Encoded size of one spawn entry carrying a generator.
const SPAWN_ENTRY_LEN: usize = 25;

const MODE_SPAWN: u8 = 0;
const MODE_DESTROY: u8 = 1;
const MODE_ADD: u8 = 0;
const MODE_REMOVE: u8 = 1;

impl SyncMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            SyncMessage::LoginExchange { .. } => MessageType::LoginExchange,
            SyncMessage::LoginExchangeEx(_) => MessageType::LoginExchangeEx,
            SyncMessage::Ping { .. } => MessageType::Ping,
            SyncMessage::PlayerLogin(_) => MessageType::PlayerLogin,
            SyncMessage::PlayerLogout(_) => MessageType::PlayerLogout,
            SyncMessage::SpawnNpc(_) => MessageType::SpawnNpc,
            SyncMessage::RoleLogin(_) => MessageType::RoleLogin,
            SyncMessage::RoleStatusFlag(_) => MessageType::RoleStatusFlag,
            SyncMessage::DynaMap(_) => MessageType::DynaMap,
            SyncMessage::Action(request) => match request.kind {
                ActionKind::Action => MessageType::Action,
                ActionKind::Walk => MessageType::Walk,
                ActionKind::Interact => MessageType::Interact,
            },
            SyncMessage::QueryRole(_) => MessageType::QueryRole,
        }
    }

    /// Encodes the message into one frame.
    pub fn encode(&self) -> Result<Vec<u8>, LinkError> {
        let mut w = PacketWriter::new(self.message_type().as_u16());
        match self {
            SyncMessage::LoginExchange { username, password } => {
                w.write_str(username).write_str(password);
            }
            SyncMessage::LoginExchangeEx(result) => {
                w.write_u8(*result as u8);
            }
            SyncMessage::Ping { origin_ms, reply_ms } => {
                w.write_u64(*origin_ms).write_u64(*reply_ms);
            }
            SyncMessage::PlayerLogin(player) => {
                w.write_u32(player.id.0)
                    .write_u32(player.account.0)
                    .write_str(&player.name)
                    .write_u16(player.level)
                    .write_u32(player.hp)
                    .write_u32(player.max_hp);
                match &player.guild {
                    Some(guild) => w.write_bool(true).write_str(guild),
                    None => w.write_bool(false),
                };
                w.write_u32(player.map.0);
                write_cell(&mut w, player.cell);
            }
            SyncMessage::PlayerLogout(id) | SyncMessage::QueryRole(id) => {
                w.write_u32(id.0);
            }
            SyncMessage::SpawnNpc(SpawnBatch::Spawn(entries)) => {
                w.write_u8(MODE_SPAWN).write_count(entries.len());
                for entry in entries {
                    write_entry(&mut w, entry);
                }
            }
            SyncMessage::SpawnNpc(SpawnBatch::Destroy(ids)) => {
                w.write_u8(MODE_DESTROY).write_count(ids.len());
                for id in ids {
                    w.write_u32(id.0);
                }
            }
            SyncMessage::RoleLogin(entry) => write_entry(&mut w, entry),
            SyncMessage::RoleStatusFlag(change) => {
                let duration_ms = u32::try_from(change.duration.as_millis()).unwrap_or(u32::MAX);
                w.write_u32(change.target.0)
                    .write_u32(change.caster.0)
                    .write_u16(change.flag)
                    .write_u32(duration_ms)
                    .write_bool(change.attach);
            }
            SyncMessage::DynaMap(DynaMapChange::Add(descriptor)) => {
                w.write_u8(MODE_ADD)
                    .write_u32(descriptor.id.0)
                    .write_str(&descriptor.name)
                    .write_i32(descriptor.width)
                    .write_i32(descriptor.height)
                    .write_count(descriptor.blocked.len());
                for cell in &descriptor.blocked {
                    write_cell(&mut w, *cell);
                }
            }
            SyncMessage::DynaMap(DynaMapChange::Remove(id)) => {
                w.write_u8(MODE_REMOVE).write_u32(id.0);
            }
            SyncMessage::Action(request) => {
                w.write_u32(request.actor.0);
                match request.target {
                    Some(target) => w.write_bool(true).write_u32(target.0),
                    None => w.write_bool(false),
                };
                w.write_u16(request.verb).write_u32(request.map.0);
                write_cell(&mut w, request.cell);
            }
        }
        w.finish()
    }

    /// Decodes one complete frame.
    pub fn decode(frame: &[u8]) -> Result<Self, LinkError> {
        let (tag, payload) = split_frame(frame)?;
        let message_type = MessageType::try_from(tag)?;
        let mut r = PacketReader::new(payload);
        let message = match message_type {
            MessageType::LoginExchange => SyncMessage::LoginExchange {
                username: r.read_str()?,
                password: r.read_str()?,
            },
            MessageType::LoginExchangeEx => SyncMessage::LoginExchangeEx(LoginResult::from_u8(r.read_u8()?)?),
            MessageType::Ping => SyncMessage::Ping {
                origin_ms: r.read_u64()?,
                reply_ms: r.read_u64()?,
            },
            MessageType::PlayerLogin => SyncMessage::PlayerLogin(PlayerSnapshot {
                id: RoleId(r.read_u32()?),
                account: AccountId(r.read_u32()?),
                name: r.read_str()?,
                level: r.read_u16()?,
                hp: r.read_u32()?,
                max_hp: r.read_u32()?,
                guild: if r.read_bool()? { Some(r.read_str()?) } else { None },
                map: MapId(r.read_u32()?),
                cell: read_cell(&mut r)?,
            }),
            MessageType::PlayerLogout => SyncMessage::PlayerLogout(RoleId(r.read_u32()?)),
            MessageType::QueryRole => SyncMessage::QueryRole(RoleId(r.read_u32()?)),
            MessageType::SpawnNpc => {
                let mode = r.read_u8()?;
                let count = r.read_u16()? as usize;
                match mode {
                    MODE_SPAWN => SyncMessage::SpawnNpc(SpawnBatch::Spawn(
                        (0..count).map(|_| read_entry(&mut r)).collect::<Result<_, _>>()?,
                    )),
                    MODE_DESTROY => SyncMessage::SpawnNpc(SpawnBatch::Destroy(
                        (0..count)
                            .map(|_| r.read_u32().map(RoleId))
                            .collect::<Result<_, _>>()?,
                    )),
                    other => return Err(LinkError::Decode(format!("unknown SpawnNpc mode {other}"))),
                }
            }
            MessageType::RoleLogin => SyncMessage::RoleLogin(read_entry(&mut r)?),
            MessageType::RoleStatusFlag => SyncMessage::RoleStatusFlag(StatusChange {
                target: RoleId(r.read_u32()?),
                caster: RoleId(r.read_u32()?),
                flag: r.read_u16()?,
                duration: Duration::from_millis(u64::from(r.read_u32()?)),
                attach: r.read_bool()?,
            }),
            MessageType::DynaMap => match r.read_u8()? {
                MODE_ADD => {
                    let id = MapId(r.read_u32()?);
                    let name = r.read_str()?;
                    let width = r.read_i32()?;
                    let height = r.read_i32()?;
                    let count = r.read_u16()? as usize;
                    let blocked = (0..count).map(|_| read_cell(&mut r)).collect::<Result<_, _>>()?;
                    SyncMessage::DynaMap(DynaMapChange::Add(MapDescriptor {
                        id,
                        name,
                        width,
                        height,
                        blocked,
                    }))
                }
                MODE_REMOVE => SyncMessage::DynaMap(DynaMapChange::Remove(MapId(r.read_u32()?))),
                other => return Err(LinkError::Decode(format!("unknown DynaMap mode {other}"))),
            },
            MessageType::Action | MessageType::Walk | MessageType::Interact => {
                let kind = match message_type {
                    MessageType::Walk => ActionKind::Walk,
                    MessageType::Interact => ActionKind::Interact,
                    _ => ActionKind::Action,
                };
                SyncMessage::Action(ActionRequest {
                    kind,
                    actor: RoleId(r.read_u32()?),
                    target: if r.read_bool()? { Some(RoleId(r.read_u32()?)) } else { None },
                    verb: r.read_u16()?,
                    map: MapId(r.read_u32()?),
                    cell: read_cell(&mut r)?,
                })
            }
        };
        Ok(message)
    }
}

fn write_cell(w: &mut PacketWriter, cell: Cell) {
    w.write_i32(cell.x).write_i32(cell.y);
}

fn read_cell(r: &mut PacketReader<'_>) -> Result<Cell, LinkError> {
    Ok(Cell::new(r.read_i32()?, r.read_i32()?))
}

fn write_entry(w: &mut PacketWriter, entry: &SpawnEntry) {
    w.write_u32(entry.id.0);
    match entry.generator {
        Some(generator) => w.write_bool(true).write_u32(generator.0),
        None => w.write_bool(false),
    };
    w.write_u32(entry.template.0).write_u32(entry.map.0);
    write_cell(w, entry.cell);
}

fn read_entry(r: &mut PacketReader<'_>) -> Result<SpawnEntry, LinkError> {
    Ok(SpawnEntry {
        id: RoleId(r.read_u32()?),
        generator: if r.read_bool()? { Some(GeneratorId(r.read_u32()?)) } else { None },
        template: TemplateId(r.read_u32()?),
        map: MapId(r.read_u32()?),
        cell: read_cell(r)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, map: u32) -> SpawnEntry {
        SpawnEntry {
            id: RoleId(id),
            generator: Some(GeneratorId(3)),
            template: TemplateId(9),
            map: MapId(map),
            cell: Cell::new(4, -2),
        }
    }

    #[test]
    fn spawn_batch_survives_the_wire() {
        let message = SyncMessage::SpawnNpc(SpawnBatch::Spawn(vec![entry(1_050_000, 1), entry(1_050_001, 2)]));
        let frame = message.encode().unwrap();
        assert_eq!(u16::from_le_bytes([frame[2], frame[3]]), 31005);
        assert_eq!(SyncMessage::decode(&frame).unwrap(), message);
    }

    #[test]
    fn spawn_frames_stop_at_the_entry_bound() {
        let max = SpawnBatch::max_entries_per_frame();
        assert_eq!(max, 2_621);
        let full: Vec<_> = (0..max as u32).map(|i| entry(1_050_000 + i, 1)).collect();
        let frame = SyncMessage::SpawnNpc(SpawnBatch::Spawn(full.clone())).encode().unwrap();
        assert!(frame.len() <= MAX_FRAME_LEN);

        let mut over = full;
        over.push(entry(1_060_000, 1));
        assert!(SyncMessage::SpawnNpc(SpawnBatch::Spawn(over)).encode().is_err());
    }

    #[test]
    fn action_kind_travels_in_the_type_tag() {
        let message = SyncMessage::Action(ActionRequest {
            kind: ActionKind::Walk,
            actor: RoleId(42),
            target: None,
            verb: 0,
            map: MapId(1),
            cell: Cell::new(10, 11),
        });
        let frame = message.encode().unwrap();
        assert_eq!(u16::from_le_bytes([frame[2], frame[3]]), MessageType::Walk.as_u16());
        assert_eq!(SyncMessage::decode(&frame).unwrap(), message);
    }

    #[test]
    fn unknown_tags_and_modes_are_decode_errors() {
        let frame = PacketWriter::new(12).finish().unwrap();
        assert!(matches!(SyncMessage::decode(&frame), Err(LinkError::Decode(_))));

        let mut bad_mode = PacketWriter::new(MessageType::SpawnNpc.as_u16());
        bad_mode.write_u8(7).write_u16(0);
        assert!(SyncMessage::decode(&bad_mode.finish().unwrap()).is_err());

        let mut bad_result = PacketWriter::new(MessageType::LoginExchangeEx.as_u16());
        bad_result.write_u8(99);
        assert!(SyncMessage::decode(&bad_result.finish().unwrap()).is_err());
    }

    #[test]
    fn player_snapshot_builds_a_shadow() {
        let snapshot = PlayerSnapshot {
            id: RoleId(42),
            account: AccountId(42),
            name: "Ayla".into(),
            level: 30,
            hp: 800,
            max_hp: 900,
            guild: Some("Dawn".into()),
            map: MapId(1),
            cell: Cell::new(5, 5),
        };
        let frame = SyncMessage::PlayerLogin(snapshot.clone()).encode().unwrap();
        let SyncMessage::PlayerLogin(decoded) = SyncMessage::decode(&frame).unwrap() else {
            panic!("wrong message");
        };
        let shadow = decoded.into_shadow();
        assert!(shadow.is_player());
        assert!(shadow.variant::<CharacterProfile>().unwrap().shadow);
        assert_eq!(PlayerSnapshot::from_role(&shadow), Some(snapshot));
    }

    #[test]
    fn status_duration_saturates() {
        let change = StatusChange {
            target: RoleId(1),
            caster: RoleId(2),
            flag: 4,
            duration: Duration::from_secs(u64::MAX / 2000),
            attach: true,
        };
        let frame = SyncMessage::RoleStatusFlag(change).encode().unwrap();
        let SyncMessage::RoleStatusFlag(decoded) = SyncMessage::decode(&frame).unwrap() else {
            panic!("wrong message");
        };
        assert_eq!(decoded.duration, Duration::from_millis(u64::from(u32::MAX)));
    }
}
