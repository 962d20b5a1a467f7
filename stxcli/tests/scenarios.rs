//! End-to-end flows through the public API.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use stxcli::dispatch::{Invocation, JoinPolicy};
use stxcli::error::{CleanupError, Error, ErrorKind, TransportError};
use stxcli::registry::{SessionName, SessionRegistry, StaticInventory};
use stxcli::table::{self, FilterOptions};
use stxcli::tracker::{TrackOutcome, TrackSpec, track};
use stxcli::transport::{Connector, ShellChannel, SshConfig};
use stxcli::{CleanupRegistry, CleanupScope};

const PROMPT: &str = "sysadmin@controller-0:~$ ";

const HOST_LIST: &str = "\
+----+--------------+-------------+----------------+-------------+--------------+
| id | hostname     | personality | administrative | operational | availability |
+----+--------------+-------------+----------------+-------------+--------------+
| 1  | controller-0 | controller  | unlocked       | enabled     | available    |
| 2  | controller-1 | controller  | unlocked       | enabled     | available    |
| 3  | compute-0    | worker      | locked         | disabled    | offline      |
+----+--------------+-------------+----------------+-------------+--------------+";

/// Minimal bash-like shell: echoes input and answers `echo $?`.
struct LabShell {
    pending: VecDeque<Bytes>,
    line: Vec<u8>,
    last_code: i32,
    commands: Arc<Mutex<Vec<String>>>,
}

impl LabShell {
    fn new(commands: Arc<Mutex<Vec<String>>>) -> Self {
        let mut shell = Self {
            pending: VecDeque::new(),
            line: Vec::new(),
            last_code: 0,
            commands,
        };
        shell.emit(PROMPT);
        shell
    }

    fn emit(&mut self, text: &str) {
        self.pending.push_back(Bytes::from(text.replace('\n', "\r\n")));
    }

    fn handle(&mut self, line: &str) {
        self.emit(&format!("{line}\n"));
        if line == "echo $?" {
            let code = self.last_code;
            self.emit(&format!("{code}\n"));
        } else {
            self.commands.lock().unwrap().push(line.to_string());
            let (output, code) = match line {
                "source /etc/platform/openrc && system host-list" => (HOST_LIST, 0),
                _ => ("bash: command not found", 127),
            };
            self.emit(&format!("{output}\n"));
            self.last_code = code;
        }
        self.emit(PROMPT);
    }
}

#[async_trait]
impl ShellChannel for LabShell {
    async fn write(&mut self, data: &[u8]) -> stxcli::Result<()> {
        for &byte in data {
            match byte {
                b'\n' => {
                    let line = String::from_utf8_lossy(&self.line).into_owned();
                    self.line.clear();
                    self.handle(&line);
                }
                b'\r' => {}
                other => self.line.push(other),
            }
        }
        Ok(())
    }

    async fn read(&mut self) -> stxcli::Result<Option<Bytes>> {
        match self.pending.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                std::future::pending::<()>().await;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> stxcli::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct LabConnector {
    commands: Arc<Mutex<Vec<String>>>,
    opened: AtomicUsize,
}

#[async_trait]
impl Connector for LabConnector {
    async fn connect(&self, config: &SshConfig) -> stxcli::Result<Box<dyn ShellChannel>> {
        if config.host != "10.10.10.2" {
            return Err(TransportError::ConnectionFailed {
                host: config.host.clone(),
                port: config.port,
                source: std::io::Error::new(std::io::ErrorKind::HostUnreachable, "no route to host"),
            }
            .into());
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LabShell::new(self.commands.clone())))
    }
}

const LAB: &str = r#"{
    "hosts": {
        "active-controller": { "host": "10.10.10.2", "username": "sysadmin", "password": "Li69nux*" }
    },
    "credential_profiles": { "admin": "source /etc/platform/openrc" }
}"#;

#[test]
fn test_parse_show_output() {
    let lines = [
        "+------+------+",
        "| Property | Value |",
        "+------+------+",
        "| id   | 7    |",
        "| name | hello|",
        "+------+------+",
    ];
    let record = table::parse_vertical(&lines).unwrap();

    assert_eq!(record.len(), 2);
    assert_eq!(record["id"], "7");
    assert_eq!(record["name"], "hello");
}

#[test]
fn test_parse_list_with_continuation() {
    let lines = [
        "+---+-----------------+",
        "| k | v               |",
        "+---+-----------------+",
        "| a | long value that |",
        "|   | continues here  |",
        "+---+-----------------+",
    ];
    let table = table::parse_horizontal(&lines).unwrap();

    assert_eq!(table.len(), 1);
    assert_eq!(table.rows()[0]["k"], "a");
    assert_eq!(table.rows()[0]["v"], "long value that continues here");
}

#[test]
fn test_mixed_flag_kinds() {
    let invocation = Invocation::builder("thing", "create", Duration::from_secs(60))
        .flag("--name", "x")
        .flag("--enable", true)
        .flag("--disable", false)
        .list("--tag", ["a", "b"], JoinPolicy::Repeat)
        .props("--prop", [("k", "v")], JoinPolicy::Repeat)
        .arg("target")
        .build();

    assert_eq!(
        invocation.to_line(),
        "thing create --name x --enable --tag a --tag b --prop k=v target"
    );
}

#[tokio::test(start_paused = true)]
async fn test_tracker_reaches_expected() {
    let spec = TrackSpec::for_states(
        "app applied",
        &["applied"],
        &["apply-failed"],
        Duration::from_secs(1),
        Duration::from_millis(10),
    );
    let mut states = VecDeque::from(["applying", "applying", "applied"]);
    let calls = AtomicUsize::new(0);

    let report = track(&spec, || {
        calls.fetch_add(1, Ordering::SeqCst);
        let state = states.pop_front().unwrap_or("applied").to_string();
        async move { Ok(state) }
    })
    .await
    .unwrap();

    assert_eq!(report.outcome, TrackOutcome::Reached("applied".to_string()));
    assert_eq!(report.probes, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_tracker_terminal_failure() {
    let spec = TrackSpec::for_states(
        "app applied",
        &["applied"],
        &["apply-failed"],
        Duration::from_secs(1),
        Duration::from_millis(10),
    );
    let calls = AtomicUsize::new(0);

    let report = track(&spec, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok("apply-failed".to_string()) }
    })
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(report.elapsed < Duration::from_millis(10));
    assert_eq!(report.outcome, TrackOutcome::FailedTerminal("apply-failed".to_string()));

    let err = report.into_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TrackerFailedTerminal);
}

#[tokio::test]
async fn test_reverse_order_cleanup_with_failure() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut cleanup = CleanupRegistry::new();

    for id in ["d1", "d2", "d3"] {
        let order = order.clone();
        cleanup.add_with("volume", id, CleanupScope::Function, move |id: String| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(id.clone());
                if id == "d2" {
                    Err(Error::from(TransportError::Disconnected))
                } else {
                    Ok(())
                }
            }
        });
    }

    let err = cleanup.release(CleanupScope::Function, Duration::from_secs(60)).await.unwrap_err();

    assert_eq!(*order.lock().unwrap(), vec!["d3", "d2", "d1"]);
    assert_eq!(err.kind(), ErrorKind::CleanupPartial);
    match err {
        Error::Cleanup(CleanupError::Partial {
            attempted, failures, ..
        }) => {
            assert_eq!(attempted, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].id, "d2");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(cleanup.pending(CleanupScope::Function), 0);
}

#[tokio::test]
async fn test_host_list_through_registry() {
    let _ = env_logger::builder().is_test(true).try_init();
    let connector = Arc::new(LabConnector::default());
    let inventory = Arc::new(StaticInventory::from_json(LAB).unwrap());
    let mut registry = SessionRegistry::new(inventory, connector.clone());

    let invocation = Invocation::builder("system", "host-list", Duration::from_secs(10))
        .credentials("admin")
        .build();
    let result = registry
        .run(&SessionName::ActiveController, &invocation)
        .await
        .unwrap();
    assert!(result.is_success());

    let hosts = table::parse_horizontal(&result.lines).unwrap();
    assert_eq!(hosts.len(), 3);

    let available = table::filter(
        &hosts,
        &[("availability", ["available"])],
        FilterOptions::default(),
    )
    .unwrap();
    assert_eq!(
        table::column(&available, "hostname").unwrap(),
        vec!["controller-0", "controller-1"]
    );

    // Second command on the cached session.
    registry
        .run(&SessionName::ActiveController, &invocation)
        .await
        .unwrap();
    assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    assert_eq!(
        *connector.commands.lock().unwrap(),
        vec![
            "source /etc/platform/openrc && system host-list",
            "source /etc/platform/openrc && system host-list",
        ]
    );

    registry.close_all().await;
}

#[tokio::test]
async fn test_failed_command_reports_exit_code() {
    let connector = Arc::new(LabConnector::default());
    let inventory = Arc::new(StaticInventory::from_json(LAB).unwrap());
    let mut registry = SessionRegistry::new(inventory, connector);

    let invocation = Invocation::builder("system", "no-such-command", Duration::from_secs(10))
        .build();
    let err = registry
        .run(&SessionName::ActiveController, &invocation)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CommandFailed);
    assert!(registry.is_cached(&SessionName::ActiveController));
}
