//! Strongly typed row identifiers.
//!
//! Every table keys its rows by a positive integer. Wrapping them keeps a
//! plan id from being passed where a subscription id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Returns the raw integer value.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Identifies a registered user.
    UserId
);
define_id!(
    /// Identifies a subscription; also used as the agent-side server handle.
    SubscriptionId
);
define_id!(
    /// Identifies a plan.
    PlanId
);
define_id!(
    /// Identifies a game.
    GameId
);
define_id!(
    /// Identifies a bare-metal host.
    HostId
);
define_id!(
    /// Identifies a game-server row.
    ServerId
);
