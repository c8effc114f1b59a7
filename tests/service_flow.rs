//! End-to-end flow against the in-process clients, driven through the
//! public API surface the way the binary wires it.
#![cfg(feature = "simulated-clients")]

use std::sync::Arc;
use std::time::Duration;

use credential_issuance::issuance::adapters::simulated::{
    SimulatedAnchorClient, SimulatedLedger, SimulatedPaymentGateway,
};
use credential_issuance::issuance::api::{self, CreateTransactionRequest, error_codes};
use credential_issuance::issuance::{
    AnchorClient, AnchorStatus, AnchoringCoordinator, ChainId, IssuanceCoordinator,
    MemoryTransactionStore, ReconciliationSweeper, SweeperConfig, TokenStatus, TransactionStatus,
    TransactionStore, anchor_channel,
};

struct Service {
    coordinator: Arc<IssuanceCoordinator>,
    anchoring: Arc<AnchoringCoordinator>,
    sweeper: ReconciliationSweeper,
}

fn service() -> Service {
    let store: Arc<dyn TransactionStore> = Arc::new(MemoryTransactionStore::new());
    let (trigger, receiver) = anchor_channel(64);
    let coordinator = Arc::new(
        IssuanceCoordinator::new(
            store.clone(),
            Arc::new(SimulatedPaymentGateway::new()),
            Arc::new(SimulatedLedger::new("0.0.4821")),
        )
        .with_anchor_trigger(trigger),
    );
    let anchors: Vec<Arc<dyn AnchorClient>> = vec![
        Arc::new(SimulatedAnchorClient::new(ChainId::new(ChainId::XRP), "testnet")),
        Arc::new(SimulatedAnchorClient::new(ChainId::new(ChainId::ALGORAND), "testnet")),
    ];
    let anchoring = Arc::new(AnchoringCoordinator::new(
        store,
        anchors,
        Duration::from_secs(10),
    ));
    tokio::spawn(anchoring.clone().run(receiver));
    let sweeper = ReconciliationSweeper::new(
        coordinator.clone(),
        anchoring.clone(),
        SweeperConfig::default(),
    );
    Service {
        coordinator,
        anchoring,
        sweeper,
    }
}

fn academic_request(student: &str) -> CreateTransactionRequest {
    CreateTransactionRequest {
        tx_type: "CREDENTIAL_ISSUANCE".to_string(),
        credential_data: serde_json::value::to_raw_value(&serde_json::json!({
            "schema": "academic-credential/v1",
            "tokenId": "0.0.4821",
            "uniqueHash": "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae",
            "ipfsURI": "ipfs://bafkreihdwdcefgh4dqkjv67uzcmw7ojee6xedzdetojuzjevtenxquvyku",
            "studentName": student,
            "degree": "Mathematics",
            "kind": "DEGREE",
            "institutionName": "Academic Chain University"
        }))
        .unwrap(),
    }
}

async fn wait_for_anchors(anchoring: &AnchoringCoordinator, id: &str, expected: usize) -> usize {
    for _ in 0..100 {
        let anchored = api::get_anchor_statuses(anchoring, id)
            .await
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.status == AnchorStatus::Anchored.as_str())
                    .count()
            })
            .unwrap_or(0);
        if anchored == expected {
            return anchored;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    0
}

#[tokio::test]
async fn test_issue_and_anchor_through_api() {
    let svc = service();

    let created = api::create_transaction(&svc.coordinator, "inst-001", academic_request("Ana Gomez"))
        .await
        .unwrap();
    assert_eq!(created.status, TransactionStatus::PendingPayment.as_str());
    assert!(created.pending);

    let done = api::process(&svc.coordinator, &created.transaction_id)
        .await
        .unwrap();
    assert_eq!(done.status, TransactionStatus::IssuanceComplete.as_str());
    assert!(!done.pending);
    assert!(done.payment_reference.is_some());
    assert!(done.issuance_reference.unwrap().starts_with("0.0.4821@"));

    assert_eq!(
        wait_for_anchors(&svc.anchoring, &created.transaction_id, 2).await,
        2
    );

    let verified = api::verify_issuance(&svc.coordinator, &created.transaction_id)
        .await
        .unwrap();
    assert_eq!(verified.token_status, Some(TokenStatus::Active));
    assert!(!verified.pending);

    // Nothing left for reconciliation
    let report = svc.sweeper.sweep_once().await;
    assert!(report.is_empty());
}

#[tokio::test]
async fn test_api_rejects_bad_input() {
    let svc = service();

    let mut req = academic_request("Ana Gomez");
    req.tx_type = "CREDENTIAL_TRANSFER".to_string();
    let (status, body) = api::create_transaction(&svc.coordinator, "inst-001", req)
        .await
        .unwrap_err();
    assert_eq!(status, 400);
    assert_eq!(body.code, error_codes::INVALID_PARAMETER);

    let (status, _) = api::create_transaction(&svc.coordinator, "   ", academic_request("Ana Gomez"))
        .await
        .unwrap_err();
    assert_eq!(status, 400);

    let (status, body) = api::get_transaction_status(&svc.coordinator, "not-an-id")
        .await
        .unwrap_err();
    assert_eq!(status, 400);
    assert_eq!(body.code, error_codes::INVALID_PARAMETER);
}

#[tokio::test]
async fn test_issue_before_payment_is_conflict() {
    let svc = service();
    let created = api::create_transaction(&svc.coordinator, "inst-001", academic_request("Luis Rey"))
        .await
        .unwrap();

    let (_, body) = api::issue(&svc.coordinator, &created.transaction_id)
        .await
        .unwrap_err();
    assert_eq!(body.code, error_codes::INVALID_TRANSITION);

    let status = api::get_transaction_status(&svc.coordinator, &created.transaction_id)
        .await
        .unwrap();
    assert_eq!(status.status, TransactionStatus::PendingPayment.as_str());
}
