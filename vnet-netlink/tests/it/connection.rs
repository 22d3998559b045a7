use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use vnet_netlink::{ConnectionError, ConnectionOptions, Errno, NetlinkConnection, Request};
use vnet_transport::pair;
use vnet_wire::{Message, NlFlags};

use crate::kernel::{body, reply, Kernel, PORT};

const FAMILY: u16 = 0x1c;

fn connect(options: ConnectionOptions) -> (NetlinkConnection, vnet_netlink::Notifications, Kernel) {
    let _ = tracing_subscriber::fmt::try_init();

    let (transport, peer) = pair(PORT);
    let (conn, notifications) = NetlinkConnection::with_options(transport, options);
    (conn, notifications, Kernel::new(peer))
}

#[tokio::test]
async fn requests_carry_sequence_and_port() {
    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());
    assert_eq!(conn.port_id(), PORT);

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 3, 1).with_body(Bytes::from_static(b"abcd"))).await }
    });

    let request = kernel.recv().await;
    assert_eq!(request.ty(), FAMILY);
    assert_eq!(request.seq(), 1);
    assert_eq!(request.pid(), PORT);
    assert!(request.flags().contains(NlFlags::REQUEST));
    assert_eq!(&body(&request)[..], b"abcd");

    kernel.send([reply(&request, NlFlags::empty(), Bytes::from_static(b"ok"))]);

    let replies = task.await.unwrap().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(&body(&replies[0])[..], b"ok");
    assert_eq!(conn.stats().requests(), 1);
    assert_eq!(conn.stats().responses(), 1);
}

#[tokio::test]
async fn out_of_order_replies_reach_their_callers() {
    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());

    let first = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1)).await }
    });
    let first_request = kernel.recv().await;

    let second = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1)).await }
    });
    let second_request = kernel.recv().await;

    assert_eq!(second_request.seq(), first_request.seq() + 1);

    // N + 1 first, then N
    kernel.send([reply(&second_request, NlFlags::empty(), Bytes::from_static(b"second"))]);
    kernel.send([reply(&first_request, NlFlags::empty(), Bytes::from_static(b"first"))]);

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(&body(&first[0])[..], b"first");
    assert_eq!(&body(&second[0])[..], b"second");
}

#[tokio::test(start_paused = true)]
async fn timeout_fires_once_and_late_reply_is_dropped() {
    let options = ConnectionOptions::default()
        .timeout(Duration::from_secs(1))
        .timeout_check_interval(Duration::from_millis(100));
    let (conn, mut notifications, mut kernel) = connect(options);

    let calls = Arc::new(AtomicUsize::new(0));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();

    conn.request_with_callback(Request::new(FAMILY, 1, 1), {
        let calls = Arc::clone(&calls);
        move |result| {
            calls.fetch_add(1, Ordering::SeqCst);
            let _ = result_tx.send(result);
        }
    })
    .await;

    let request = kernel.recv().await;

    let result = result_rx.recv().await.unwrap();
    assert!(matches!(result, Err(ConnectionError::Timeout)), "{result:?}");
    assert_eq!(conn.stats().timeouts(), 1);

    kernel.send([reply(&request, NlFlags::empty(), Bytes::from_static(b"late"))]);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(conn.stats().dropped(), 1);
    assert!(tokio::time::timeout(Duration::from_millis(500), notifications.next()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn per_request_timeout_overrides_default() {
    let options = ConnectionOptions::default().timeout(Duration::from_secs(60));
    let (conn, _notifications, mut kernel) = connect(options);

    let task = tokio::spawn({
        let conn = conn.clone();
        async move {
            conn.request(Request::new(FAMILY, 1, 1).with_timeout(Duration::from_millis(300))).await
        }
    });
    let _request = kernel.recv().await;

    let started = tokio::time::Instant::now();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(ConnectionError::Timeout)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn timeout_fires_on_a_quiet_connection() {
    let options = ConnectionOptions::default()
        .timeout(Duration::from_millis(300))
        .timeout_check_interval(Duration::from_millis(50));
    let (conn, _notifications, mut kernel) = connect(options);

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1)).await }
    });
    // Nothing else happens on the connection after this.
    let _request = kernel.recv().await;

    let result = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("driver never swept the pending request")
        .unwrap();
    assert!(matches!(result, Err(ConnectionError::Timeout)), "{result:?}");
    assert_eq!(conn.stats().timeouts(), 1);
}

#[tokio::test]
async fn kernel_errors_are_typed() {
    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 2, 1)).await }
    });

    let request = kernel.recv().await;
    kernel.send([Message::error(request.header(), -19)]);

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.errno(), Some(Errno::ENODEV));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn multipart_replies_are_assembled() {
    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1).dump()).await }
    });

    let request = kernel.recv().await;
    assert!(request.flags().contains(NlFlags::DUMP));

    kernel.send([
        reply(&request, NlFlags::MULTI, Bytes::from_static(b"one")),
        reply(&request, NlFlags::MULTI, Bytes::from_static(b"two")),
    ]);
    kernel.send([
        reply(&request, NlFlags::MULTI, Bytes::from_static(b"three")),
        Message::done(request.seq(), PORT),
    ]);

    let parts = task.await.unwrap().unwrap();
    let bodies = parts.iter().map(body).collect::<Vec<_>>();
    assert_eq!(bodies, vec![&b"one"[..], &b"two"[..], &b"three"[..]]);
}

#[tokio::test]
async fn failed_dump_reports_errno_from_done() {
    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1).dump()).await }
    });

    let request = kernel.recv().await;
    let mut done = Message::new(
        vnet_wire::msg_type::DONE,
        NlFlags::MULTI,
        Bytes::copy_from_slice(&(-22i32).to_ne_bytes()),
    );
    done.set_seq(request.seq());
    kernel.send([done]);

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.errno(), Some(Errno::EINVAL));
}

#[tokio::test]
async fn ack_requests_complete_at_the_ack() {
    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1).ack()).await }
    });

    let request = kernel.recv().await;
    kernel.send([reply(&request, NlFlags::empty(), Bytes::from_static(b"echo"))]);
    kernel.send([Message::error(request.header(), 0)]);

    let parts = task.await.unwrap().unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(&body(&parts[0])[..], b"echo");

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1).ack()).await }
    });
    let request = kernel.recv().await;
    kernel.send([Message::error(request.header(), 0)]);
    assert!(task.await.unwrap().unwrap().is_empty());
}

#[tokio::test]
async fn overrun_fails_the_request() {
    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1).dump()).await }
    });

    let request = kernel.recv().await;
    let mut overrun = Message::new(vnet_wire::msg_type::OVERRUN, NlFlags::empty(), Bytes::new());
    overrun.set_seq(request.seq());
    kernel.send([overrun]);

    assert!(matches!(task.await.unwrap(), Err(ConnectionError::Overrun)));
}

#[tokio::test]
async fn unsolicited_messages_become_notifications() {
    let (conn, mut notifications, mut kernel) = connect(ConnectionOptions::default());

    conn.join_group(5).await.unwrap();
    assert!(kernel.peer().is_member(5));

    let mut event = Message::new(FAMILY, NlFlags::empty(), Bytes::from_static(&[1, 1, 0, 0]));
    event.set_seq(0);
    kernel.send([event.clone()]);

    let received = notifications.next().await.unwrap();
    assert_eq!(received, event);
    assert_eq!(conn.stats().notifications(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_requests_are_cancelled() {
    let options = ConnectionOptions::default().timeout_check_interval(Duration::from_millis(50));
    let (conn, mut notifications, mut kernel) = connect(options);

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1)).await }
    });
    let request = kernel.recv().await;

    task.abort();
    let _ = task.await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(conn.stats().cancelled(), 1);

    kernel.send([reply(&request, NlFlags::empty(), Bytes::new())]);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(conn.stats().dropped(), 1);
    assert!(tokio::time::timeout(Duration::from_millis(100), notifications.next()).await.is_err());
}

#[tokio::test]
async fn too_many_pending_requests_are_rejected() {
    let options = ConnectionOptions::default().max_pending_requests(1);
    let (conn, _notifications, mut kernel) = connect(options);

    let first = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1)).await }
    });
    let request = kernel.recv().await;

    let second = conn.request(Request::new(FAMILY, 1, 1)).await;
    assert!(matches!(second, Err(ConnectionError::TooManyRequests)));

    kernel.send([reply(&request, NlFlags::empty(), Bytes::new())]);
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn transport_failure_fails_everything_pending() {
    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());

    let pending = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1)).await }
    });
    let _request = kernel.recv().await;

    kernel.peer().fail(io::ErrorKind::ConnectionReset.into());

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ConnectionError::ConnectionLost(io::ErrorKind::ConnectionReset)));

    let err = conn.request(Request::new(FAMILY, 1, 1)).await.unwrap_err();
    assert!(matches!(err, ConnectionError::Closed));
}

#[tokio::test]
async fn receive_buffer_overrun_is_recoverable() {
    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());

    kernel.peer().fail(io::Error::from_raw_os_error(105));

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1)).await }
    });
    let request = kernel.recv().await;
    kernel.send([reply(&request, NlFlags::empty(), Bytes::from_static(b"still here"))]);

    let parts = task.await.unwrap().unwrap();
    assert_eq!(&body(&parts[0])[..], b"still here");
}

#[tokio::test]
async fn malformed_datagrams_are_dropped() {
    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());

    assert!(kernel.peer().send(Bytes::from_static(&[1, 2, 3])));

    let task = tokio::spawn({
        let conn = conn.clone();
        async move { conn.request(Request::new(FAMILY, 1, 1)).await }
    });
    let request = kernel.recv().await;
    kernel.send([reply(&request, NlFlags::empty(), Bytes::new())]);

    assert!(task.await.unwrap().is_ok());
    assert_eq!(conn.stats().dropped(), 1);
}

#[tokio::test]
async fn concurrent_requests_with_random_completion_order() {
    use rand::seq::SliceRandom;

    let (conn, _notifications, mut kernel) = connect(ConnectionOptions::default());

    let mut tasks = Vec::new();
    let mut requests = Vec::new();
    for i in 0..32u32 {
        tasks.push(tokio::spawn({
            let conn = conn.clone();
            let body = Bytes::copy_from_slice(&i.to_ne_bytes());
            async move { (i, conn.request(Request::new(FAMILY, 1, 1).with_body(body)).await) }
        }));
        requests.push(kernel.recv().await);
    }

    requests.shuffle(&mut rand::thread_rng());
    for request in &requests {
        // Echo the request body back so each caller can check it got its own reply.
        kernel.send([reply(request, NlFlags::empty(), body(request))]);
    }

    for task in tasks {
        let (i, result) = task.await.unwrap();
        let parts = result.unwrap();
        assert_eq!(&body(&parts[0])[..], &i.to_ne_bytes());
    }
}
