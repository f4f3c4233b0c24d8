//! The controller loop. Polls the case store and moves every case one step
//! toward settlement per cycle.
//!
//! Stage dispatch:
//! - `Draft` / `Waiting` / `Done`: nothing to do here.
//! - `InProgress`: keep the approval challenge fresh and watch for quorum;
//!   once the ledger validates it, the case advances to `Executing`.
//! - `Executing`: run distribution passes; a completed distribution closes
//!   the case.

use std::time::Duration;

use anyhow::{Context, Result};

use keirloom_core::SeedVault;
use keirloom_exec::model::DistributionStatus;
use keirloom_exec::quorum::ApprovalState;
use keirloom_exec::records::CaseStage;
use keirloom_exec::{codes, CaseRepo, DistributionOrchestrator, ExecConfig, QuorumOrchestrator};
use keirloom_gateway::{JsonRpcGateway, LedgerGateway};
use keirloom_store::{CaseLease, CaseStore, SqliteStore};

use crate::config::ServerConfig;

/// Run the daemon loop. Blocks forever (until shutdown signal).
pub async fn run(config: ServerConfig) -> Result<()> {
    log::info!("Keirloom server starting…");
    log::info!("  Ledger RPC:  {}", config.ledger.rpc_url);
    log::info!("  Data dir:    {}", config.server.data_dir.display());
    log::info!("  Interval:    {} seconds", config.server.poll_interval_secs);
    log::info!("  Signer:      {}", config.signer.address);
    log::info!("  Verify addr: {}", config.ledger.verify_address);

    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data dir: {}",
            config.server.data_dir.display()
        )
    })?;

    let interval = Duration::from_secs(config.server.poll_interval_secs);

    // Run the first cycle immediately, then loop
    let mut first = true;
    loop {
        if !first {
            tokio::time::sleep(interval).await;
        }
        first = false;

        match run_cycle(&config) {
            Ok(()) => log::debug!("Poll cycle completed."),
            Err(e) => log::error!("Poll cycle failed: {:#}", e),
        }
    }
}

/// Execute a single poll cycle: open the store, connect the gateway, and
/// drive every known case.
pub fn run_cycle(config: &ServerConfig) -> Result<()> {
    let db_path = config.db_path();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open case store at {}", db_path.display()))?;
    let ledger = JsonRpcGateway::new(
        &config.ledger.rpc_url,
        Duration::from_secs(config.ledger.timeout_secs),
    )
    .context("Failed to create ledger gateway")?;
    let vault = SeedVault::new(&config.vault.master_key);
    let exec_config = config.exec_config();

    let case_ids = store.list_case_ids().context("Failed to list cases")?;
    log::info!("Driving {} case(s)", case_ids.len());

    for case_id in &case_ids {
        if let Err(e) = drive_case(&store, &ledger, &vault, &exec_config, case_id) {
            if e.code == codes::CASE_BUSY {
                log::debug!("[{}] held elsewhere, skipping this cycle", case_id);
            } else if e.is_retryable() {
                log::warn!("[{}] {}", case_id, e);
            } else {
                log::error!("[{}] {}", case_id, e);
            }
        }
    }

    Ok(())
}

/// Advance one case by one step. The orchestrator calls take the case lease
/// themselves, so this only leases around the bare stage flips.
fn drive_case(
    store: &dyn CaseStore,
    ledger: &dyn LedgerGateway,
    vault: &SeedVault,
    config: &ExecConfig,
    case_id: &str,
) -> keirloom_exec::Result<()> {
    let repo = CaseRepo::new(store);
    let case = repo.case(case_id)?;

    match case.stage {
        CaseStage::Draft | CaseStage::Waiting | CaseStage::Done => Ok(()),
        CaseStage::InProgress => {
            let quorum = QuorumOrchestrator::new(store, ledger, vault, config);
            match quorum.approval_status(case_id)? {
                ApprovalState::Validated => {
                    advance_stage(store, config, case_id, CaseStage::Executing)?;
                    log::info!("[{}] approval validated, distribution begins", case_id);
                    Ok(())
                }
                ApprovalState::Expired => {
                    let snapshot = quorum.prepare(case_id, true)?;
                    log::warn!(
                        "[{}] approval expired, reissued (valid through ledger {})",
                        case_id,
                        snapshot.approval.last_ledger_sequence
                    );
                    Ok(())
                }
                ApprovalState::Pending => {
                    let snapshot = quorum.prepare(case_id, false)?;
                    log::info!(
                        "[{}] approval pending, {}/{} heir signatures",
                        case_id,
                        snapshot.signatures_count,
                        snapshot.required_count
                    );
                    Ok(())
                }
            }
        }
        CaseStage::Executing => {
            let distribution = DistributionOrchestrator::new(store, ledger, vault, config);
            let state = distribution.execute(case_id)?;
            match state.status {
                DistributionStatus::Completed => {
                    advance_stage(store, config, case_id, CaseStage::Done)?;
                    log::info!(
                        "[{}] distribution completed ({} transfers), case closed",
                        case_id,
                        state.success_count
                    );
                }
                DistributionStatus::Partial | DistributionStatus::Failed => {
                    // stays Executing so newly added plans get picked up
                    log::warn!(
                        "[{}] distribution settled with {} item(s) needing escalation",
                        case_id,
                        state.escalation_count
                    );
                }
                DistributionStatus::Running => {
                    log::info!(
                        "[{}] distribution running, {}/{} transfers verified",
                        case_id,
                        state.success_count,
                        state.total_count
                    );
                }
                DistributionStatus::Pending => {}
            }
            Ok(())
        }
    }
}

/// Flip the case stage under the lease.
fn advance_stage(
    store: &dyn CaseStore,
    config: &ExecConfig,
    case_id: &str,
    stage: CaseStage,
) -> keirloom_exec::Result<()> {
    let _lease = CaseLease::acquire_with_ttl(store, case_id, config.lease_ttl_secs)?;
    let repo = CaseRepo::new(store);
    let mut case = repo.case(case_id)?;
    case.stage = stage;
    repo.put_case(&case)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keirloom_exec::model::LockMethod;
    use keirloom_exec::test_utils::{sign_share, test_keypair, TestWorld};

    /// Case locked and attested, ready for the controller to drive.
    fn attested_world() -> TestWorld {
        let world = TestWorld::new();
        world.seed_case("case-1", "owner", &["heir-1", "heir-2"]);
        world.add_verified_heir("case-1", "heir-1", 0x11);
        world.add_verified_heir("case-1", "heir-2", 0x12);
        world.add_asset("case-1", "asset-1", 50_000_000, 10_000_000, 0x21);
        world.add_percent_plan("case-1", "plan-1", "asset-1", &[("heir-1", 60), ("heir-2", 40)]);

        let lock = world.lock();
        lock.start("case-1", LockMethod::RegularKey).unwrap();
        world.delegate_regular_keys("case-1");
        lock.verify_regular_key("case-1").unwrap();
        lock.execute("case-1").unwrap();
        lock.complete("case-1").unwrap();
        world.set_stage("case-1", CaseStage::InProgress);
        world
    }

    fn drive(world: &TestWorld) -> keirloom_exec::Result<()> {
        drive_case(
            &world.store,
            &world.ledger,
            &world.vault,
            &world.config,
            "case-1",
        )
    }

    #[test]
    fn test_drive_ignores_dormant_stages() {
        let world = attested_world();
        for stage in [CaseStage::Draft, CaseStage::Waiting, CaseStage::Done] {
            world.set_stage("case-1", stage);
            drive(&world).unwrap();
            assert!(world.repo().approval_tx("case-1").unwrap().is_none());
        }
    }

    #[test]
    fn test_drive_walks_case_to_completion() {
        let world = attested_world();

        // cycle 1: issues the signer list and the approval challenge
        drive(&world).unwrap();
        let approval = world.repo().approval_tx("case-1").unwrap().unwrap();
        assert_eq!(
            world.repo().case("case-1").unwrap().stage,
            CaseStage::InProgress
        );

        // heirs co-sign out of band; the second share reaches quorum
        let quorum = world.quorum();
        quorum
            .sign(
                "case-1",
                "heir-1",
                &sign_share(&approval.tx_json, &test_keypair(0x11)),
            )
            .unwrap();
        quorum
            .sign(
                "case-1",
                "heir-2",
                &sign_share(&approval.tx_json, &test_keypair(0x12)),
            )
            .unwrap();

        // cycle 2: the validated approval moves the case to Executing
        drive(&world).unwrap();
        assert_eq!(
            world.repo().case("case-1").unwrap().stage,
            CaseStage::Executing
        );

        // cycle 3: distribution pays out and closes the case
        drive(&world).unwrap();
        assert_eq!(world.repo().case("case-1").unwrap().stage, CaseStage::Done);
        let state = world
            .repo()
            .distribution_state("case-1")
            .unwrap()
            .unwrap();
        assert_eq!(state.status, DistributionStatus::Completed);
        assert_eq!(state.success_count, state.total_count);

        // further cycles are no-ops
        let submissions = world.ledger.submission_count();
        drive(&world).unwrap();
        assert_eq!(world.ledger.submission_count(), submissions);
    }

    #[test]
    fn test_drive_reissues_expired_challenge() {
        let world = attested_world();
        drive(&world).unwrap();
        let first = world.repo().approval_tx("case-1").unwrap().unwrap();

        // nobody signed before the challenge ran out
        world.ledger.advance_ledger(19);
        drive(&world).unwrap();

        let second = world.repo().approval_tx("case-1").unwrap().unwrap();
        assert_ne!(first.memo, second.memo);
        assert_eq!(
            world.repo().case("case-1").unwrap().stage,
            CaseStage::InProgress
        );
    }

    #[test]
    fn test_drive_skips_leased_case() {
        let world = attested_world();
        let _lease = CaseLease::acquire(&world.store, "case-1").unwrap();

        let err = drive(&world).unwrap_err();
        assert_eq!(err.code, codes::CASE_BUSY);
        assert!(err.is_retryable());
    }
}
