pub mod decimator;
pub mod npy;
pub mod parse_client;
pub mod post_policy;
pub mod presign_client;
pub mod storage;
pub mod transport;
