use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

lazy_static! {
    pub static ref LOCATION_PINGS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attendance_location_pings",
        "total number of accepted location pings per source",
        &["source"]
    )
    .unwrap();
    pub static ref WS_SESSIONS: IntGauge = register_int_gauge!(
        "attendance_ws_sessions",
        "number of currently registered realtime sessions"
    )
    .unwrap();
    pub static ref WS_EVICTED_SESSIONS_TOTAL: IntCounter = register_int_counter!(
        "attendance_ws_evicted_sessions",
        "total number of sessions evicted as slow consumers"
    )
    .unwrap();
    pub static ref BUS_MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attendance_bus_messages",
        "total number of frames crossing the pub/sub bus per direction",
        &["direction"]
    )
    .unwrap();
    pub static ref SCHEDULER_TASKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attendance_scheduler_tasks",
        "total number of scheduler tasks per outcome",
        &["outcome"]
    )
    .unwrap();
}
