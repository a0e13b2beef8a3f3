pub(crate) mod conversations;
pub(crate) mod messages;
pub(crate) mod polls;

pub(crate) use conversations::*;
pub(crate) use messages::*;
pub(crate) use polls::*;
