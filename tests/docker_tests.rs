//! Runs against a real Docker daemon; use `cargo test -- --ignored` to enable.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use codejudge::compare::CompareMode;
use codejudge::config::Limits;
use codejudge::judge::{Judge, TestCase};
use codejudge::languages::LanguageRegistry;
use codejudge::sandbox::{DockerBackend, ExecutionStatus, IsolatedRunner};

fn docker_judge(timeout: Duration) -> Judge {
    let backend = DockerBackend::build("docker", true).unwrap();
    backend.ping().unwrap();
    Judge::new(
        Arc::new(LanguageRegistry::with_builtin()),
        IsolatedRunner::new(Arc::new(backend)),
        Limits {
            timeout,
            ..Default::default()
        },
    )
}

#[test]
#[ignore]
fn test_docker_python_echo() {
    let judge = docker_judge(Duration::from_secs(30));

    let result = judge.execute("python", "print(input()[::-1])", "olleh\n");

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "");
}

#[test]
#[ignore]
fn test_docker_sleep_times_out() {
    let judge = docker_judge(Duration::from_secs(2));

    let result = judge.execute("python", "import time\ntime.sleep(30)", "");

    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(result.elapsed < Duration::from_secs(20));
}

#[test]
#[ignore]
fn test_docker_network_is_unreachable() {
    let judge = docker_judge(Duration::from_secs(30));
    let source = "\
import socket
try:
    socket.create_connection(('1.1.1.1', 53), timeout=3)
    print('connected')
except OSError:
    print('blocked')
";

    let result = judge.execute("python", source, "");

    assert_eq!(result.stdout, "blocked\n");
}

#[test]
#[ignore]
fn test_docker_batch_binary_search() {
    let judge = docker_judge(Duration::from_secs(30));
    let source = "\
import bisect
*nums, target = map(int, open(0).read().split())
i = bisect.bisect_left(nums, target)
print(i if i < len(nums) and nums[i] == target else -1)
";
    let cases = vec![
        TestCase::new("1 3 5 6 9\n5", "2"),
        TestCase::new("1 3 5 6 9\n4", "-1"),
        TestCase::new("1\n1", "0"),
    ];

    let verdict = judge.run_batch("python", source, &cases, CompareMode::Tolerant, 1e-6);

    assert!(verdict.passed, "{:?}", verdict.cases);
}
