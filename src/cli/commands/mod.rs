mod pubsub;

pub use pubsub::{run_publish, run_subscribe, ENV_BROKER_ADDRESS};
