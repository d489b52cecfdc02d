use anyhow::{Result, anyhow};
use chrono::TimeDelta;
use mailvault_backup::{BackupError, BackupStage, BackupState, Trigger};
use mailvault_config::ConfigKey;
use mailvault_test_support::{
    ARCHIVE, HOST, Harness, ScriptedRemote, StoreOp, backup_source, reference_time,
};

const NEW_ARTIFACT: &str = "2024-03-09/20240309T053000Z-mailbackup.tar";

fn standalone_cleanup(commands: &[String]) -> usize {
    commands
        .iter()
        .filter(|command| command.starts_with("sudo -n rm -f 'mailbackup.tar'"))
        .count()
}

#[tokio::test]
async fn any_missing_required_key_fails_before_connecting() -> Result<()> {
    for key in ConfigKey::REQUIRED_FOR_BACKUP {
        let mut source = backup_source();
        source.remove(key);
        let harness = Harness::new(source)?;

        let report = harness.orchestrator.run_backup(Trigger::Manual).await;

        assert!(!report.success, "{key} missing should fail");
        assert_eq!(report.failed_stage, Some(BackupStage::Resolve));
        assert_eq!(report.state, BackupState::Failed);
        let error = report.error.ok_or_else(|| anyhow!("error text"))?;
        assert!(error.contains(key.env_name()), "{error}");
        assert_eq!(harness.remote.connects(), 0);
        assert!(harness.store.ops().is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn blank_keys_count_as_missing_and_are_reported_together() -> Result<()> {
    let source = backup_source()
        .with(ConfigKey::SshHost, "   ")
        .with(ConfigKey::SourcePath, "");
    let harness = Harness::new(source)?;

    let report = harness.orchestrator.run_backup(Trigger::Scheduled).await;

    let error = report.error.ok_or_else(|| anyhow!("error text"))?;
    assert!(error.contains("MAILVAULT_SSH_HOST"));
    assert!(error.contains("MAILVAULT_SOURCE_PATH"));
    assert_eq!(harness.remote.connects(), 0);
    Ok(())
}

#[tokio::test]
async fn refused_connection_stops_the_run() -> Result<()> {
    let remote = ScriptedRemote::new().refuse_connections("Permission denied (publickey).");
    let harness = Harness::with_remote(backup_source(), remote)?;

    let report = harness.orchestrator.run_backup(Trigger::Manual).await;

    assert!(!report.success);
    assert_eq!(report.failed_stage, Some(BackupStage::Connect));
    assert_eq!(harness.remote.hosts(), [HOST]);
    assert!(harness.remote.commands().is_empty());
    assert!(harness.store.ops().is_empty());
    Ok(())
}

#[tokio::test]
async fn archive_failure_never_attempts_a_transfer() -> Result<()> {
    let remote = ScriptedRemote::new().exit_with("tar -cf", 2, "tar: /var/mail: Cannot open");
    let harness = Harness::with_remote(backup_source(), remote)?;
    harness
        .store
        .insert_aged("2024-03-06/20240306T053000Z-mailbackup.tar", TimeDelta::days(3));

    let report = harness.orchestrator.run_backup(Trigger::Manual).await;

    assert!(!report.success);
    assert_eq!(report.failed_stage, Some(BackupStage::Archive));
    let error = report.error.ok_or_else(|| anyhow!("error text"))?;
    assert!(error.contains("remote command exited with status 2"), "{error}");
    assert!(!harness.remote.ran("curl"));
    assert_eq!(standalone_cleanup(&harness.remote.commands()), 0);
    assert!(harness.store.ops().is_empty());
    assert_eq!(
        harness.store.names(),
        ["2024-03-06/20240306T053000Z-mailbackup.tar"]
    );
    assert_eq!(harness.remote.closes(), 1);
    Ok(())
}

#[tokio::test]
async fn archive_failure_report_carries_remote_stderr() -> Result<()> {
    let remote = ScriptedRemote::new().exit_with(
        "tar -cf",
        2,
        "tar: /var/mail: Cannot open: Permission denied\n",
    );
    let harness = Harness::with_remote(backup_source(), remote)?;

    let report = harness.orchestrator.run_backup(Trigger::Manual).await;

    let error = report.error.ok_or_else(|| anyhow!("error text"))?;
    assert!(
        error.contains("status 2 (stderr: tar: /var/mail: Cannot open: Permission denied)"),
        "{error}"
    );
    Ok(())
}

#[tokio::test]
async fn terminated_archive_command_is_an_archive_failure() -> Result<()> {
    let remote = ScriptedRemote::new().terminate("tar -cf");
    let harness = Harness::with_remote(backup_source(), remote)?;

    let report = harness.orchestrator.run_backup(Trigger::Manual).await;

    assert_eq!(report.failed_stage, Some(BackupStage::Archive));
    assert!(!harness.remote.ran("curl"));
    Ok(())
}

#[tokio::test]
async fn transfer_failure_never_runs_retention() -> Result<()> {
    let remote = ScriptedRemote::new().exit_with("curl ", 22, "curl: (22) 403");
    let harness = Harness::with_remote(backup_source(), remote)?;
    harness
        .store
        .insert_aged("2024-03-06/20240306T053000Z-mailbackup.tar", TimeDelta::days(3));

    let report = harness.orchestrator.run_backup(Trigger::Manual).await;

    assert!(!report.success);
    assert_eq!(report.failed_stage, Some(BackupStage::Transfer));
    assert!(report.pruned.is_empty());
    let ops = harness.store.ops();
    assert!(!ops.contains(&StoreOp::List));
    assert!(!ops.iter().any(|op| matches!(op, StoreOp::Delete(_))));
    assert_eq!(
        harness.store.names(),
        ["2024-03-06/20240306T053000Z-mailbackup.tar"]
    );
    Ok(())
}

#[tokio::test]
async fn missing_upload_fails_verification() -> Result<()> {
    let harness = Harness::new(backup_source())?;
    harness.store.discard_uploads();
    harness
        .store
        .insert_aged("2024-03-06/20240306T053000Z-mailbackup.tar", TimeDelta::days(3));

    let report = harness.orchestrator.run_backup(Trigger::Manual).await;

    assert!(!report.success);
    assert_eq!(report.failed_stage, Some(BackupStage::Verify));
    let error = report.error.ok_or_else(|| anyhow!("error text"))?;
    assert!(error.starts_with("archive transfer failed"), "{error}");
    assert!(!harness.store.ops().contains(&StoreOp::List));
    Ok(())
}

#[tokio::test]
async fn cleanup_runs_after_successful_and_failed_transfers() -> Result<()> {
    let ok = Harness::new(backup_source())?;
    let report = ok.orchestrator.run_backup(Trigger::Manual).await;
    assert!(report.success);
    assert_eq!(standalone_cleanup(&ok.remote.commands()), 1);
    assert!(!ok.remote.has_file(ARCHIVE));

    let failing = ScriptedRemote::new().exit_with("curl ", 7, "curl: (7) connect failed");
    let failed = Harness::with_remote(backup_source(), failing)?;
    let report = failed.orchestrator.run_backup(Trigger::Manual).await;
    assert!(!report.success);
    assert_eq!(report.failed_stage, Some(BackupStage::Transfer));
    assert_eq!(standalone_cleanup(&failed.remote.commands()), 1);
    assert!(!failed.remote.has_file(ARCHIVE));
    Ok(())
}

#[tokio::test]
async fn cleanup_failure_does_not_change_the_outcome() -> Result<()> {
    let remote = ScriptedRemote::new()
        .exit_with("curl ", 0, "")
        .exit_with("rm -f", 1, "rm: cannot remove: Read-only file system");
    let harness = Harness::with_remote(backup_source(), remote)?;

    let report = harness.orchestrator.run_backup(Trigger::Manual).await;

    assert!(report.success);
    assert_eq!(report.state, BackupState::Succeeded);
    assert_eq!(standalone_cleanup(&harness.remote.commands()), 1);
    let rendered = harness.metrics.render()?;
    assert!(rendered.contains("stage=\"cleanup\""));
    assert!(rendered.contains("status=\"failed\""));

    let failing = ScriptedRemote::new()
        .exit_with("curl ", 22, "curl: (22) 403")
        .exit_with("rm -f", 1, "rm: cannot remove");
    let failed = Harness::with_remote(backup_source(), failing)?;
    let report = failed.orchestrator.run_backup(Trigger::Manual).await;
    assert_eq!(report.failed_stage, Some(BackupStage::Transfer));
    Ok(())
}

#[tokio::test]
async fn retention_deletes_exactly_the_artifacts_at_or_past_the_window() -> Result<()> {
    let harness = Harness::new(backup_source())?;
    let aged = [
        ("2024-03-09/20240309T010000Z-mailbackup.tar", TimeDelta::zero()),
        ("2024-03-08/20240308T053000Z-mailbackup.tar", TimeDelta::days(1)),
        ("2024-03-07/20240307T053000Z-mailbackup.tar", TimeDelta::days(2)),
        ("2024-03-06/20240306T053000Z-mailbackup.tar", TimeDelta::days(3)),
    ];
    for (name, age) in aged {
        harness.store.insert_aged(name, age);
    }

    let report = harness.orchestrator.run_backup(Trigger::Scheduled).await;

    assert!(report.success);
    let mut pruned = report.pruned.clone();
    pruned.sort();
    assert_eq!(
        pruned,
        [
            "2024-03-06/20240306T053000Z-mailbackup.tar",
            "2024-03-07/20240307T053000Z-mailbackup.tar"
        ]
    );
    assert_eq!(
        harness.store.names(),
        [
            "2024-03-08/20240308T053000Z-mailbackup.tar",
            "2024-03-09/20240309T010000Z-mailbackup.tar",
            NEW_ARTIFACT
        ]
    );
    assert_eq!(harness.metrics.snapshot().backup_artifacts_pruned_total, 2);
    Ok(())
}

#[tokio::test]
async fn consecutive_runs_never_leave_the_container_empty() -> Result<()> {
    let harness = Harness::new(backup_source())?;

    for _ in 0..4 {
        let report = harness.orchestrator.run_backup(Trigger::Scheduled).await;
        assert!(report.success);
        harness.clock.advance(TimeDelta::days(1));
    }

    let counts = harness.store.observed_backup_counts();
    let first_upload = counts
        .iter()
        .position(|count| *count > 0)
        .ok_or_else(|| anyhow!("no upload observed"))?;
    assert!(counts[first_upload..].iter().all(|count| *count >= 1), "{counts:?}");
    assert_eq!(harness.store.names().len(), 2);
    Ok(())
}

#[tokio::test]
async fn retention_failures_are_warnings_not_failures() -> Result<()> {
    let harness = Harness::new(backup_source())?;
    harness.store.fail_listing();

    let report = harness.orchestrator.run_backup(Trigger::Manual).await;

    assert!(report.success);
    let warning = report.prune_warning.ok_or_else(|| anyhow!("prune warning"))?;
    assert!(warning.starts_with("retention pruning failed"), "{warning}");

    let stuck = "2024-03-05/20240305T053000Z-mailbackup.tar";
    let partial = Harness::new(backup_source())?;
    partial.store.insert_aged(stuck, TimeDelta::days(4));
    partial
        .store
        .insert_aged("2024-03-06/20240306T053000Z-mailbackup.tar", TimeDelta::days(3));
    partial.store.fail_deletes_of(stuck);

    let report = partial.orchestrator.run_backup(Trigger::Manual).await;

    assert!(report.success);
    assert_eq!(report.pruned, ["2024-03-06/20240306T053000Z-mailbackup.tar"]);
    let warning = report.prune_warning.ok_or_else(|| anyhow!("prune warning"))?;
    assert!(warning.contains(stuck));
    Ok(())
}

#[tokio::test]
async fn end_to_end_backup_with_retention() -> Result<()> {
    let harness = Harness::new(backup_source())?;
    let three_days = "2024-03-06/20240306T053000Z-mailbackup.tar";
    let one_day = "2024-03-08/20240308T053000Z-mailbackup.tar";
    harness.store.insert_aged(three_days, TimeDelta::days(3));
    harness.store.insert_aged(one_day, TimeDelta::days(1));

    let report = harness.orchestrator.run_backup(Trigger::Scheduled).await;

    assert!(report.success);
    assert_eq!(report.state, BackupState::Succeeded);
    assert_eq!(report.artifact.as_deref(), Some(NEW_ARTIFACT));
    assert!(NEW_ARTIFACT.starts_with(&reference_time().format("%Y-%m-%d/").to_string()));
    assert_eq!(report.pruned, [three_days]);
    assert_eq!(harness.store.names(), [one_day, NEW_ARTIFACT]);

    assert_eq!(harness.remote.hosts(), [HOST]);
    let commands = harness.remote.commands();
    assert_eq!(commands[0], "sudo -n tar -cf 'mailbackup.tar' '/var/mail'");
    assert!(commands[1].starts_with("curl --fail"));
    assert_eq!(commands[2], "sudo -n rm -f 'mailbackup.tar'");
    assert!(harness.remote.detached()[0].contains("apt-get -y update"));
    assert_eq!(harness.remote.closes(), 1);

    let uploaded = harness
        .store
        .get(NEW_ARTIFACT)
        .ok_or_else(|| anyhow!("uploaded artifact"))?;
    assert_eq!(uploaded.size, mailvault_test_support::remote::ARCHIVE_BYTES.len() as u64);

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.backup_in_flight, 0);
    assert_eq!(snapshot.backup_last_success_timestamp, reference_time().timestamp());
    Ok(())
}

#[tokio::test]
async fn delegated_grant_never_reaches_logged_commands() -> Result<()> {
    let harness = Harness::new(backup_source())?;

    let report = harness.orchestrator.run_backup(Trigger::Manual).await;

    assert!(report.success);
    assert!(harness.remote.commands().iter().any(|text| text.contains("sig=")));
    assert!(
        harness
            .remote
            .displayed_commands()
            .iter()
            .all(|text| !text.contains("sig="))
    );
    Ok(())
}

#[tokio::test]
async fn streaming_mode_uploads_from_this_process() -> Result<()> {
    let source = backup_source()
        .with(ConfigKey::TransferMode, "streaming")
        .with(ConfigKey::UseSudo, "false")
        .with(ConfigKey::RemoteMaintenance, "false");
    let harness = Harness::new(source)?;

    let report = harness.orchestrator.run_backup(Trigger::Cli).await;

    assert!(report.success);
    assert!(!harness.remote.ran("curl"));
    assert!(harness.remote.detached().is_empty());
    assert_eq!(
        harness.remote.commands(),
        ["tar -cf 'mailbackup.tar' '/var/mail'", "rm -f 'mailbackup.tar'"]
    );
    assert!(harness.store.ops().contains(&StoreOp::Put(NEW_ARTIFACT.into())));
    Ok(())
}

#[tokio::test]
async fn overlapping_runs_are_rejected() -> Result<()> {
    let harness = Harness::new(backup_source())?;
    let gate = harness.remote.gate("tar -cf");

    let orchestrator = harness.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.run_backup(Trigger::Scheduled).await });
    gate.entered().await;

    assert!(harness.orchestrator.is_running());
    let second = harness.orchestrator.try_run_backup(Trigger::Manual).await;
    assert!(matches!(second, Err(BackupError::AlreadyRunning { .. })));
    let rejected = harness.orchestrator.run_backup(Trigger::Manual).await;
    assert_eq!(rejected.failed_stage, Some(BackupStage::Orchestrate));

    gate.release();
    let report = first.await?;
    assert!(report.success);
    assert!(!harness.orchestrator.is_running());
    assert_eq!(harness.remote.connects(), 1);
    Ok(())
}

#[tokio::test]
async fn panics_are_reported_as_failed_runs() -> Result<()> {
    let remote = ScriptedRemote::new().panic_on("tar -cf");
    let harness = Harness::with_remote(backup_source(), remote)?;

    let report = harness.orchestrator.run_backup(Trigger::Manual).await;

    assert!(!report.success);
    assert_eq!(report.state, BackupState::Failed);
    assert_eq!(report.failed_stage, Some(BackupStage::Orchestrate));
    let error = report.error.ok_or_else(|| anyhow!("error text"))?;
    assert!(error.starts_with("backup run panicked"), "{error}");
    assert!(!harness.orchestrator.is_running());
    assert_eq!(harness.metrics.snapshot().backup_in_flight, 0);
    Ok(())
}

#[tokio::test]
async fn dropped_caller_does_not_cancel_the_run() -> Result<()> {
    let harness = Harness::new(backup_source())?;
    let gate = harness.remote.gate("curl ");

    let orchestrator = harness.orchestrator.clone();
    let caller =
        tokio::spawn(async move { orchestrator.try_run_backup(Trigger::Manual).await });
    gate.entered().await;
    assert!(harness.remote.has_file(ARCHIVE));

    caller.abort();
    assert!(caller.await.is_err_and(|err| err.is_cancelled()));
    assert!(harness.orchestrator.is_running());
    assert_eq!(harness.metrics.snapshot().backup_in_flight, 1);

    gate.release();
    harness.orchestrator.idle().await;
    assert!(!harness.orchestrator.is_running());
    assert_eq!(harness.metrics.snapshot().backup_in_flight, 0);
    assert!(!harness.remote.has_file(ARCHIVE));
    assert_eq!(harness.remote.closes(), 1);
    assert!(harness.store.names().iter().any(|name| name == NEW_ARTIFACT));
    Ok(())
}
