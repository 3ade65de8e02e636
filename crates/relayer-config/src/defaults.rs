/// The default port the health and metrics API listens on.
pub const fn api_port() -> u16 {
    8080
}
/// Share of the total stake weight that must attest a message.
pub const fn quorum_percentage() -> u64 {
    67
}
/// Chains are enabled unless the config says otherwise.
pub const fn enabled() -> bool {
    true
}
/// The maximum blocks per step is set to `100` by default.
pub const fn max_blocks_per_step() -> u64 {
    100
}
/// Polling interval of the live feed in milliseconds.
pub const fn polling_interval() -> u64 {
    1_000
}
/// The print progress interval is set to `7_000` by default.
pub const fn print_progress_interval() -> u64 {
    7_000
}
/// Pause between two attempts of a failed step, in milliseconds.
pub const fn retry_interval() -> u64 {
    1_000
}
/// Delivery attempts of one message before the coordinator restarts.
pub const fn max_delivery_attempts() -> usize {
    5
}
/// Signature request rounds before a delivery is deferred.
pub const fn max_collection_rounds() -> u32 {
    3
}
/// Pause between two signature request rounds, in milliseconds.
pub const fn collection_round_interval() -> u64 {
    500
}
