use capq::Error;
use capq::config::{Config, DispatcherConfig};
use capq::pool::AdmissionPolicy;
use std::sync::Mutex;

// Tests in this file mutate process-wide environment variables.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: [&str; 3] = ["CAPQ_MAX_CONCURRENT", "CAPQ_ADMISSION", "CAPQ_DRAIN_ON_STOP"];

fn clear_vars() {
    for var in VARS {
        unsafe {
            std::env::remove_var(var);
        }
    }
}

#[test]
fn config_from_env_uses_defaults_when_unset() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_vars();

    let config = Config::from_env().unwrap();
    assert_eq!(config.dispatcher, DispatcherConfig::default());
    assert_eq!(config.dispatcher.max_concurrent, 4);
    assert_eq!(config.dispatcher.admission, AdmissionPolicy::Block);
    assert!(config.dispatcher.drain_on_stop);
    assert!(!config.log_level.is_empty());
}

#[test]
fn config_from_env_reads_dispatcher_settings() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::set_var("CAPQ_MAX_CONCURRENT", "8");
        std::env::set_var("CAPQ_ADMISSION", "Reject");
        std::env::set_var("CAPQ_DRAIN_ON_STOP", "false");
    }

    let config = Config::from_env().unwrap();
    clear_vars();

    assert_eq!(
        config.dispatcher,
        DispatcherConfig {
            max_concurrent: 8,
            admission: AdmissionPolicy::Reject,
            drain_on_stop: false,
        }
    );
}

#[test]
fn config_from_env_rejects_zero_workers() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::set_var("CAPQ_MAX_CONCURRENT", "0");
    }

    let result = Config::from_env();
    clear_vars();

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn config_from_env_rejects_unknown_policy() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::set_var("CAPQ_ADMISSION", "shed");
    }

    let result = Config::from_env();
    clear_vars();

    let Err(Error::Config(message)) = result else {
        panic!("expected a config error");
    };
    assert!(message.contains("CAPQ_ADMISSION"), "{message}");
}

// ---------------------------------------------------------------------------
// TOML file
// ---------------------------------------------------------------------------

fn write_temp(contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("capq-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn dispatcher_config_loads_from_toml_with_defaults() {
    let path = write_temp("max_concurrent = 2\nadmission = \"reject\"\n");

    let config = DispatcherConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(config.max_concurrent, 2);
    assert_eq!(config.admission, AdmissionPolicy::Reject);
    assert!(config.drain_on_stop);
}

#[test]
fn dispatcher_config_rejects_unknown_keys() {
    let path = write_temp("max_concurrency = 2\n");

    let result = DispatcherConfig::load(&path);
    std::fs::remove_file(&path).ok();

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn dispatcher_config_missing_file_is_an_io_error() {
    let result = DispatcherConfig::load(std::path::Path::new("/nonexistent/capq.toml"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn dispatcher_config_rejects_more_workers_than_semaphore_permits() {
    let config = DispatcherConfig {
        max_concurrent: usize::MAX,
        ..DispatcherConfig::default()
    };
    let Err(Error::Config(message)) = config.validate() else {
        panic!("expected a config error");
    };
    assert!(message.contains("at most"), "{message}");

    let path = write_temp(&format!(
        "max_concurrent = {}\n",
        tokio::sync::Semaphore::MAX_PERMITS + 1
    ));
    let result = DispatcherConfig::load(&path);
    std::fs::remove_file(&path).ok();
    assert!(matches!(result, Err(Error::Config(_))));

    let largest = DispatcherConfig {
        max_concurrent: tokio::sync::Semaphore::MAX_PERMITS,
        ..DispatcherConfig::default()
    };
    assert!(largest.validate().is_ok());
}

#[test]
fn config_from_env_rejects_oversized_worker_count() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::set_var("CAPQ_MAX_CONCURRENT", usize::MAX.to_string());
    }

    let result = Config::from_env();
    clear_vars();

    assert!(matches!(result, Err(Error::Config(_))));
}
