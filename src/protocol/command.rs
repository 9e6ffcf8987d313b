//! Command definitions
//!
//! The fixed table mapping TCP command names to their one-byte codes.

macro_rules! tcp_commands {
    ($($name:ident = $code:literal,)+) => {
        /// TCP command codes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum TcpCommand {
            $($name = $code,)+
        }

        impl TcpCommand {
            /// Every known command, in code order
            pub const ALL: &'static [TcpCommand] = &[$(TcpCommand::$name,)+];

            /// Look up a command by its wire code
            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some(TcpCommand::$name),)+
                    _ => None,
                }
            }

            /// Command name as used in logs
            pub fn name(self) -> &'static str {
                match self {
                    $(TcpCommand::$name => stringify!($name),)+
                }
            }
        }
    };
}

tcp_commands! {
    // System commands
    HeartbeatRequestCommand = 0x01,
    HeartbeatResponseCommand = 0x02,

    Ping = 0x03,
    Pong = 0x04,

    PrepareAck = 0x05,
    CommitAck = 0x06,

    SlaveAssignment = 0x07,
    CloneAssignment = 0x08,

    SubscribeReplica = 0x10,
    ReplicaLogPositionAck = 0x11,
    CreateChunk = 0x12,
    PhysicalChunkBulk = 0x13,
    LogicalChunkBulk = 0x14,

    // Client commands
    CreateStream = 0x80,
    CreateStreamCompleted = 0x81,

    WriteEvents = 0x82,
    WriteEventsCompleted = 0x83,

    TransactionStart = 0x84,
    TransactionStartCompleted = 0x85,
    TransactionWrite = 0x86,
    TransactionWriteCompleted = 0x87,
    TransactionCommit = 0x88,
    TransactionCommitCompleted = 0x89,

    DeleteStream = 0x8A,
    DeleteStreamCompleted = 0x8B,

    ReadEvent = 0xB0,
    ReadEventCompleted = 0xB1,
    ReadStreamEventsForward = 0xB2,
    ReadStreamEventsForwardCompleted = 0xB3,
    ReadStreamEventsBackward = 0xB4,
    ReadStreamEventsBackwardCompleted = 0xB5,
    ReadAllEventsForward = 0xB6,
    ReadAllEventsForwardCompleted = 0xB7,
    ReadAllEventsBackward = 0xB8,
    ReadAllEventsBackwardCompleted = 0xB9,

    SubscribeToStream = 0xC0,
    SubscriptionConfirmation = 0xC1,
    StreamEventAppeared = 0xC2,
    UnsubscribeFromStream = 0xC3,
    SubscriptionDropped = 0xC4,

    ScavengeDatabase = 0xD0,

    BadRequest = 0xF0,
    DeniedToRoute = 0xF1,
}

impl TcpCommand {
    /// The one-byte wire code
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for TcpCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
