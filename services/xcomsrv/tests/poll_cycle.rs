//! End-to-end poll-cycle behavior over a scripted serial link.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use scom_proto::encode_user_info_response;
use xcomsrv::bridge::{plan_outcome, LinkAvailability};
use xcomsrv::config::{ParameterDescriptor, PollConfig};
use xcomsrv::executor::{RequestExecutor, TransactionOutcome};
use xcomsrv::scheduler::{OutcomeSink, PollScheduler};
use xcomsrv::transport::{MockLink, Reply};

fn descriptor(parameter_id: u32, device_address: u32, name: &str, sign: f32) -> ParameterDescriptor {
    ParameterDescriptor {
        parameter_id,
        device_address,
        name: name.to_string(),
        display_name: name.to_string(),
        topic_segment: "XT".to_string(),
        unit: "kW".to_string(),
        sign,
        scale: 1.0,
        device_class: "power".to_string(),
    }
}

/// Records what the bridge would publish, using the real outcome-planning
/// logic against a live availability flag.
#[derive(Default)]
struct RecordingSink {
    availability: LinkAvailability,
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<(String, String)> {
        self.events.lock().clone()
    }

    fn topics(&self) -> Vec<String> {
        self.events().into_iter().map(|(topic, _)| topic).collect()
    }
}

#[async_trait]
impl OutcomeSink for RecordingSink {
    async fn publish_outcome(&self, descriptor: &ParameterDescriptor, outcome: &TransactionOutcome) {
        let plan = plan_outcome(descriptor, outcome, &self.availability, true);
        let mut events = self.events.lock();
        if let Some(marker) = plan.availability_marker {
            events.push(("studer/commstatus".to_string(), marker.to_string()));
        }
        events.push((
            format!("studer/{}/{}", descriptor.topic_segment, descriptor.name),
            plan.value_payload,
        ));
    }
}

fn scheduler_with(
    link: &MockLink,
    table: Vec<ParameterDescriptor>,
) -> PollScheduler<MockLink> {
    PollScheduler::new(
        RequestExecutor::new(link.clone()),
        Arc::new(table),
        &PollConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn sweep_publishes_once_per_descriptor_in_table_order() {
    let table = vec![
        descriptor(3000, 101, "first", 1.0),
        descriptor(3001, 101, "second", 1.0),
        descriptor(3002, 102, "third", 1.0),
    ];
    let link = MockLink::new();
    link.push_reply(Reply::Respond(encode_user_info_response(101, 3000, 1.0)));
    link.push_reply(Reply::Respond(encode_user_info_response(101, 3001, 2.0)));
    link.push_reply(Reply::Respond(encode_user_info_response(102, 3002, 3.0)));

    let sink = RecordingSink::default();
    let mut scheduler = scheduler_with(&link, table);
    let completed = scheduler.run_sweep(&sink, &CancellationToken::new()).await;

    assert!(completed);
    assert_eq!(
        sink.events(),
        vec![
            ("studer/commstatus".to_string(), "online".to_string()),
            ("studer/XT/first".to_string(), "1.000".to_string()),
            ("studer/XT/second".to_string(), "2.000".to_string()),
            ("studer/XT/third".to_string(), "3.000".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_descriptor_publishes_sentinel_and_availability_follows_each_outcome() {
    // Middle descriptor times out on the header read; the outer two succeed.
    // Raw -2.0 with sign -1 publishes as 2.000.
    let table = vec![
        descriptor(3000, 101, "first", 1.0),
        descriptor(3001, 101, "second", 1.0),
        descriptor(3002, 102, "third", -1.0),
    ];
    let link = MockLink::new();
    link.push_reply(Reply::Respond(encode_user_info_response(101, 3000, 1.5)));
    link.push_reply(Reply::Silent);
    link.push_reply(Reply::Respond(encode_user_info_response(102, 3002, -2.0)));

    let sink = RecordingSink::default();
    let mut scheduler = scheduler_with(&link, table);
    scheduler.run_sweep(&sink, &CancellationToken::new()).await;

    assert_eq!(
        sink.events(),
        vec![
            ("studer/commstatus".to_string(), "online".to_string()),
            ("studer/XT/first".to_string(), "1.500".to_string()),
            ("studer/commstatus".to_string(), "offline".to_string()),
            ("studer/XT/second".to_string(), "nAn".to_string()),
            ("studer/commstatus".to_string(), "online".to_string()),
            ("studer/XT/third".to_string(), "2.000".to_string()),
        ]
    );
}

#[tokio::test]
async fn round_robin_visits_every_descriptor_once_from_any_cursor() {
    let table = vec![
        descriptor(3000, 101, "first", 1.0),
        descriptor(3001, 101, "second", 1.0),
        descriptor(3002, 102, "third", 1.0),
    ];
    let link = MockLink::new();
    for (param, addr) in [(3000, 101), (3001, 101), (3002, 102), (3000, 101), (3001, 101)] {
        link.push_reply(Reply::Respond(encode_user_info_response(addr, param, 1.0)));
    }

    let sink = RecordingSink::default();
    let mut scheduler = scheduler_with(&link, table);

    // Advance the cursor part-way into the table first.
    scheduler.poll_next(&sink).await;
    scheduler.poll_next(&sink).await;

    // Exactly N further invocations visit every descriptor once, in order,
    // wrapping at the end of the table.
    scheduler.poll_next(&sink).await;
    scheduler.poll_next(&sink).await;
    scheduler.poll_next(&sink).await;

    // The first success also records the online availability marker.
    let topics = sink.topics();
    assert_eq!(topics.len(), 6);
    assert_eq!(
        &topics[3..],
        &[
            "studer/XT/third".to_string(),
            "studer/XT/first".to_string(),
            "studer/XT/second".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_sweep_stops_between_transactions() {
    let table = vec![
        descriptor(3000, 101, "first", 1.0),
        descriptor(3001, 101, "second", 1.0),
    ];
    let link = MockLink::new();
    let sink = RecordingSink::default();
    let mut scheduler = scheduler_with(&link, table);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let completed = scheduler.run_sweep(&sink, &cancel).await;

    assert!(!completed);
    assert!(sink.events().is_empty());
    assert!(link.sent().is_empty());
}
