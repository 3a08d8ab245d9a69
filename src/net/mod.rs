pub mod byte_pipe;
pub mod client;
pub mod framing;
pub mod manager;
pub mod protocol;
pub mod server;
