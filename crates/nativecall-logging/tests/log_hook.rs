use nativecall_logging::{init_logging, set_log_hook, LogRecord, LoggingOptions};
use std::sync::{Arc, Mutex};

#[test]
fn log_records_reach_hook() {
    let captured: Arc<Mutex<Vec<LogRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let hook = {
        let c = captured.clone();
        move |rec: &LogRecord| {
            c.lock().unwrap().push(rec.clone());
        }
    };
    set_log_hook(hook);
    let _guard = init_logging(LoggingOptions {
        default_filter: "trace".to_string(),
        stderr: false,
    });

    log::warn!(target: "nativecall::loader", "skipping libbroken.so");
    tracing::warn!(symbol = "sqrt", "prepared call interface");

    let items = captured.lock().unwrap();
    assert!(items
        .iter()
        .any(|r| r.message.contains("skipping libbroken.so") && r.level == "WARN"));
    let traced = items
        .iter()
        .find(|r| r.message.contains("prepared call interface"))
        .expect("tracing event captured");
    assert_eq!(
        traced.fields,
        Some(serde_json::json!({ "symbol": "sqrt" }))
    );
}
