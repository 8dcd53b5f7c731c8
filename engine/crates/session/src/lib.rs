pub mod actor;
pub mod command;
pub mod error;
pub mod live;
pub mod model;
pub mod sink;

pub use actor::{spawn_session_actor, ActorConfig, SaveJob, SaveRx, SaveTx, SessionHandle};
pub use command::{Command, Credentials, Delivery, Event, EventKind, GameAction, Outcome, Reply, TargetHit};
pub use error::CommandError;
pub use live::LiveSession;
pub use model::{
    snapshot_as_save, GameSave, PlayerId, PlayerRole, PlayerState, Position, SaveId, Session,
    SessionId, SessionSettings, SessionView, Weapon, WorldObject,
};
pub use sink::{ConnectionId, EventSink, NullSink, RecordingSink};
