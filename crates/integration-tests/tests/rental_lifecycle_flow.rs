//! End-to-end rental lifecycle scenarios: deploy and terminate sagas over
//! the full stack, with money movement asserted at the ledger.

use integration_tests::harness::{ScriptedProvisioner, TestStack};
use neotix_rentals::domain::orchestrator::DeployRequest;
use neotix_rentals::domain::types::RentalStatus;
use neotix_rentals::error::RentalsError;
use neotix_rentals::provisioner::ProvisionError;
use neotix_rentals::storage::CostRecordRepository;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use std::sync::Arc;

#[test_log::test(tokio::test)]
async fn full_cycle_settles_and_conserves_balance() {
    let stack = TestStack::new(dec!(1.00), dec!(10.00)).await;

    let deployed = stack
        .orchestrator
        .deploy(&stack.cluster_id, DeployRequest::default())
        .await
        .unwrap();
    assert_eq!(deployed.cost_breakdown.total_cost.as_decimal(), dec!(1.13));
    assert_eq!(stack.balance().await, dec!(8.87));

    // Two hours and fifty minutes elapsed bill as three hours.
    stack.backdate_start(&deployed.rental.id, 170).await;

    let terminated = stack.orchestrator.terminate(&stack.cluster_id).await.unwrap();
    assert_eq!(terminated.usage.hours_used, dec!(3));
    assert_eq!(terminated.usage.initial_charge.as_decimal(), dec!(1.13));
    assert_eq!(terminated.usage.final_charge.as_decimal(), dec!(3.39));
    assert_eq!(terminated.usage.settlement_charge.as_decimal(), dec!(2.26));
    assert_eq!(terminated.rental.status, RentalStatus::Completed);

    // balance_before - balance_after == deposit + settlement delta
    assert_eq!(stack.balance().await, dec!(6.61));
    assert_eq!(stack.provisioner.terminate_calls(), 1);

    // The cost record now holds the settlement figures.
    let record = stack.costs.get_for_rental(&deployed.rental.id).await.unwrap().unwrap();
    assert_eq!(record.breakdown.total_cost.as_decimal(), dec!(3.39));
}

#[tokio::test]
async fn terminate_again_returns_stored_breakdown_without_charging() {
    let stack = TestStack::new(dec!(1.00), dec!(10.00)).await;

    let deployed = stack
        .orchestrator
        .deploy(&stack.cluster_id, DeployRequest::default())
        .await
        .unwrap();
    stack.backdate_start(&deployed.rental.id, 170).await;

    let first = stack.orchestrator.terminate(&stack.cluster_id).await.unwrap();
    let balance_after_first = stack.balance().await;

    let second = stack.orchestrator.terminate(&stack.cluster_id).await.unwrap();
    assert_eq!(second.usage.hours_used, first.usage.hours_used);
    assert_eq!(
        second.usage.final_charge.as_decimal(),
        first.usage.final_charge.as_decimal()
    );
    assert_eq!(
        second.usage.settlement_charge.as_decimal(),
        first.usage.settlement_charge.as_decimal()
    );

    // No second charge and no second external terminate.
    assert_eq!(stack.balance().await, balance_after_first);
    assert_eq!(stack.provisioner.terminate_calls(), 1);
}

#[tokio::test]
async fn usage_within_first_hour_keeps_the_deposit_only() {
    let stack = TestStack::new(dec!(1.00), dec!(10.00)).await;

    let deployed = stack
        .orchestrator
        .deploy(&stack.cluster_id, DeployRequest::default())
        .await
        .unwrap();
    stack.backdate_start(&deployed.rental.id, 30).await;

    let terminated = stack.orchestrator.terminate(&stack.cluster_id).await.unwrap();
    assert_eq!(terminated.usage.hours_used, dec!(1));
    assert_eq!(terminated.usage.settlement_charge.as_decimal(), dec!(0));

    // Deposit stands, nothing refunded and no settlement transaction exists.
    assert_eq!(stack.balance().await, dec!(8.87));
    let settlement_key = format!("{}:settlement", deployed.rental.id);
    assert!(stack
        .ledger
        .find_by_idempotency_key(&settlement_key)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn concurrent_deploys_yield_exactly_one_rental() {
    let stack = TestStack::new(dec!(1.00), dec!(10.00)).await;

    let first = {
        let orchestrator = stack.orchestrator.clone();
        let cluster_id = stack.cluster_id;
        tokio::spawn(async move { orchestrator.deploy(&cluster_id, DeployRequest::default()).await })
    };
    let second = {
        let orchestrator = stack.orchestrator.clone();
        let cluster_id = stack.cluster_id;
        tokio::spawn(async move { orchestrator.deploy(&cluster_id, DeployRequest::default()).await })
    };

    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let successes = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Err(RentalsError::Conflict { .. })))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(stack.provisioner.create_calls(), 1);
    // Only one deposit was taken.
    assert_eq!(stack.balance().await, dec!(8.87));
}

#[test_log::test(tokio::test)]
async fn provision_failure_leaves_no_trace() {
    let provisioner = Arc::new(ScriptedProvisioner::new());
    provisioner.fail_next_create(ProvisionError::Capacity("no spot capacity".to_string()));
    let stack = TestStack::with_provisioner(dec!(1.00), dec!(10.00), provisioner).await;

    let result = stack
        .orchestrator
        .deploy(&stack.cluster_id, DeployRequest::default())
        .await;
    assert!(matches!(
        result,
        Err(RentalsError::Provision(ProvisionError::Capacity(_)))
    ));

    assert!(stack
        .registry
        .history_for(&stack.cluster_id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(stack.balance().await, dec!(10.00));

    // The cluster is immediately deployable again.
    stack
        .orchestrator
        .deploy(&stack.cluster_id, DeployRequest::default())
        .await
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn provider_outage_never_blocks_settlement() {
    let provisioner = Arc::new(ScriptedProvisioner::new());
    let stack = TestStack::with_provisioner(dec!(1.00), dec!(10.00), provisioner).await;

    let deployed = stack
        .orchestrator
        .deploy(&stack.cluster_id, DeployRequest::default())
        .await
        .unwrap();

    stack.provisioner.fail_terminations();

    let terminated = stack.orchestrator.terminate(&stack.cluster_id).await.unwrap();
    assert_eq!(terminated.rental.status, RentalStatus::Completed);
    assert_eq!(stack.provisioner.terminate_calls(), 1);

    // Billing finalized despite the orphaned instance.
    assert_eq!(stack.balance().await, dec!(8.87));
    let stored = stack.registry.get(&deployed.rental.id).await.unwrap();
    assert_eq!(stored.status, RentalStatus::Completed);
}

#[tokio::test]
async fn ssh_access_falls_back_to_stored_details_when_provider_cannot_answer() {
    let stack = TestStack::new(dec!(1.00), dec!(10.00)).await;

    stack
        .orchestrator
        .deploy(&stack.cluster_id, DeployRequest::default())
        .await
        .unwrap();

    // The scripted provider answers inspect with NotFound; the details stored
    // at deploy time still let the user in.
    let access = stack.orchestrator.ssh_access(&stack.cluster_id).await.unwrap();
    assert_eq!(access.instance.instance_id, "i-test0000");
    assert!(access.credentials.private_key.contains("PRIVATE KEY"));
}

#[tokio::test]
async fn live_estimate_uses_fractional_hours() {
    let stack = TestStack::new(dec!(2.00), dec!(10.00)).await;

    let deployed = stack
        .orchestrator
        .deploy(&stack.cluster_id, DeployRequest::default())
        .await
        .unwrap();
    stack.backdate_start(&deployed.rental.id, 30).await;

    let status = stack.status.resolve_cluster(&stack.cluster_id).await.unwrap();
    assert!(status.is_active);

    // Half an hour estimates at half-hour cost; a real charge for the same
    // elapsed time would bill the full first hour (2.26).
    assert_eq!(status.estimated_current_total.unwrap().as_decimal(), dec!(1.13));
    assert_eq!(status.initial_deposit.unwrap().as_decimal(), dec!(2.26));
    assert_eq!(status.additional_charges.unwrap().as_decimal(), dec!(0));

    let running_hours = status.running_hours.unwrap();
    assert!(running_hours >= dec!(0.5) && running_hours < dec!(0.51));
}
