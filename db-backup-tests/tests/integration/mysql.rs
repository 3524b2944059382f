//! MySQL integration tests
//!
//! Back up a real MySQL server to a local directory and restore it again.

use super::common::{docker, is_docker_available, is_program_available, ContainerGuard};
use anyhow::Result;
use db_backup::config::{load_config, Overrides, Settings};
use std::thread;
use std::time::Duration;
use test_utils::*;

const PORT: &str = "33061";
const PASSWORD: &str = "testpass";

fn start_mysql_container(name: &str) -> Result<ContainerGuard> {
    let publish = format!("127.0.0.1:{}:3306", PORT);
    let root_password = format!("MYSQL_ROOT_PASSWORD={}", PASSWORD);
    docker(&[
        "run",
        "-d",
        "--name",
        name,
        "-p",
        publish.as_str(),
        "-e",
        root_password.as_str(),
        "-e",
        "MYSQL_DATABASE=shop",
        "mysql:8.0",
    ])?;
    let guard = ContainerGuard::new(name);

    for _ in 0..60 {
        let ready = exec_sql(guard.name(), "SELECT 1").map(|out| out == "1");
        if ready.unwrap_or(false) {
            return Ok(guard);
        }
        thread::sleep(Duration::from_secs(1));
    }

    Err(anyhow::anyhow!("MySQL failed to become ready"))
}

fn exec_sql(container: &str, sql: &str) -> Result<String> {
    let password = format!("-p{}", PASSWORD);
    docker(&[
        "exec",
        container,
        "mysql",
        "-uroot",
        password.as_str(),
        "-N",
        "-s",
        "shop",
        "-e",
        sql,
    ])
}

fn settings_for(builder: ConfigBuilder) -> Result<(Settings, tempfile::TempDir)> {
    let (path, dir) = builder
        .database("127.0.0.1", "shop", "root", PASSWORD)
        .database_option("port", PORT)
        .database_option("single_transaction", "true")
        .persist();
    let settings = Settings::resolve(load_config(&path)?, Overrides::default())?;
    Ok((settings, dir))
}

fn tools_available() -> bool {
    if !is_docker_available() || !is_program_available("mysqldump") {
        eprintln!("Docker or the MySQL client tools are not available, skipping");
        return false;
    }
    true
}

#[test]
#[ignore]
fn test_mysql_backup_and_restore() -> Result<()> {
    if !tools_available() {
        return Ok(());
    }

    let container = start_mysql_container("db-backup-test-mysql")?;
    exec_sql(container.name(), "CREATE TABLE orders (id INT PRIMARY KEY, total DECIMAL(10,2))")?;
    exec_sql(container.name(), "INSERT INTO orders VALUES (1, 9.99), (2, 19.99), (3, 29.99)")?;

    let ctx = TestContext::new();
    let (settings, _dir) = settings_for(
        ConfigBuilder::new()
            .local_root(ctx.create_subdir("backups"))
            .destination("local", ""),
    )?;
    let manager = BackupManager::from_settings(&settings)?;
    let job = manager.job_from_settings(&settings, 1_700_000_000)?;

    let outcome = manager.run(&job, &CancellationToken::new());
    outcome.assert_succeeded();
    assert!(outcome.dump_bytes > 0);
    assert_eq!(ctx.stored_files("backups"), vec!["shop-1700000000-backup.sql.gz"]);

    exec_sql(container.name(), "DROP TABLE orders")?;
    manager.restore("database", &job.destinations()[0], &CancellationToken::new())?;

    let count = exec_sql(container.name(), "SELECT COUNT(*) FROM orders")?;
    assert_eq!(count, "3");
    Ok(())
}

#[test]
#[ignore]
fn test_mysql_wrong_password_is_a_connection_error() -> Result<()> {
    if !tools_available() {
        return Ok(());
    }

    let _container = start_mysql_container("db-backup-test-mysql-auth")?;
    let ctx = TestContext::new();
    let (mut settings, _dir) = settings_for(
        ConfigBuilder::new()
            .local_root(ctx.create_subdir("backups"))
            .destination("local", ""),
    )?;
    settings.connection.password = "wrong".into();

    let manager = BackupManager::from_settings(&settings)?;
    let job = manager.job_from_settings(&settings, 1)?;
    let outcome = manager.run(&job, &CancellationToken::new());

    outcome.assert_failed_at(Stage::Dumping, None);
    assert_eq!(outcome.exit_code(), 3);
    assert!(ctx.stored_files("backups").is_empty());
    Ok(())
}
