//! Settings loading round-trip through a real TOML file.

use rust_la::config::{ProtocolFamily, Settings, TransportConfig};
use std::time::Duration;

#[test]
fn test_settings_load_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("la.toml");
    std::fs::write(
        &path,
        r#"
log_level = "debug"

[device]
protocol = "json"

[device.transport]
type = "tcp"
host = "10.0.0.7"
port = 5555

[timeouts]
connect = "5s"
command = "750ms"
capture = "1m"
poll_interval = "50ms"
"#,
    )
    .unwrap();

    let name = dir.path().join("la");
    let settings = Settings::new(Some(name.to_str().unwrap())).unwrap();

    assert_eq!(settings.log_level, "debug");
    assert_eq!(settings.device.protocol, ProtocolFamily::Json);
    assert_eq!(
        settings.device.transport,
        TransportConfig::Tcp {
            host: "10.0.0.7".to_string(),
            port: 5555
        }
    );
    assert_eq!(settings.timeouts.connect, Duration::from_secs(5));
    assert_eq!(settings.timeouts.command, Duration::from_millis(750));
    assert_eq!(settings.timeouts.capture, Duration::from_secs(60));
    assert_eq!(settings.timeouts.poll_interval, Duration::from_millis(50));
}

#[test]
fn test_timeouts_default_when_omitted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("minimal.toml");
    std::fs::write(
        &path,
        r#"
log_level = "info"

[device]
protocol = "text"

[device.transport]
type = "serial"
port = "/dev/ttyUSB0"
baud_rate = 115200
"#,
    )
    .unwrap();

    let name = dir.path().join("minimal");
    let settings = Settings::new(Some(name.to_str().unwrap())).unwrap();
    assert_eq!(settings.timeouts.poll_interval, Duration::from_millis(100));
    assert_eq!(settings.timeouts.connect, Duration::from_secs(10));
}

#[test]
fn test_missing_file_is_error() {
    assert!(Settings::new(Some("/nonexistent/path/settings")).is_err());
}
