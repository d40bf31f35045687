//! STOMP Protocol Adapters
//!
//! - **Codec**: text frame encode/decode
//! - **Subscription ids**: per-manager `sub-<n>` sequence

pub mod codec;
pub mod subscription_id;

pub use codec::{
    CodecError, StompCommand, StompFrame, StompHeaders, decode_frame, encode_connect,
    encode_disconnect, encode_subscribe, encode_unsubscribe,
};
pub use subscription_id::SubscriptionIdGenerator;
