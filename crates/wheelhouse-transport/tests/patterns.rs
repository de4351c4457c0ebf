//! Pattern-level tests over both address schemes.

use bytes::Bytes;
use wheelhouse_transport::{Context, Frames, TransportError, Wire, WireError, verb_frame};

/// Minimal two-verb protocol for exercising the sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TestMsg {
    Ping(u64),
    Pong(u64),
}

impl Wire for TestMsg {
    fn to_frames(&self) -> Frames {
        match self {
            TestMsg::Ping(n) => vec![
                Bytes::from_static(b"PING"),
                Bytes::from(n.to_string().into_bytes()),
            ],
            TestMsg::Pong(n) => vec![
                Bytes::from_static(b"PONG"),
                Bytes::from(n.to_string().into_bytes()),
            ],
        }
    }

    fn from_frames(frames: &[Bytes]) -> Result<Self, WireError> {
        let verb = verb_frame(frames)?;
        if frames.len() != 2 {
            return Err(WireError::frame_count(verb, frames.len()));
        }
        let n: u64 = std::str::from_utf8(&frames[1])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| WireError::payload(verb, "bad counter"))?;
        match verb {
            "PING" => Ok(TestMsg::Ping(n)),
            "PONG" => Ok(TestMsg::Pong(n)),
            other => Err(WireError::UnknownVerb(other.to_owned())),
        }
    }
}

#[tokio::test]
async fn push_pull_inproc_delivers_in_order() {
    let ctx = Context::new();
    let mut pull = ctx.pull::<TestMsg>("inproc://pp", 16).await.expect("bind");
    let mut push = ctx.push::<TestMsg>("inproc://pp").await.expect("connect");
    for n in 0..5 {
        push.send(&TestMsg::Ping(n)).await.expect("send");
    }
    for n in 0..5 {
        assert_eq!(pull.recv().await.expect("recv"), TestMsg::Ping(n));
    }
}

#[tokio::test]
async fn connect_before_bind_is_an_error() {
    let ctx = Context::new();
    assert!(matches!(
        ctx.push::<TestMsg>("inproc://nowhere").await,
        Err(TransportError::NotBound(_))
    ));
}

#[tokio::test]
async fn pattern_mismatch_is_an_error() {
    let ctx = Context::new();
    let _pull = ctx.pull::<TestMsg>("inproc://mix", 4).await.expect("bind");
    assert!(matches!(
        ctx.subscribe::<TestMsg>("inproc://mix").await,
        Err(TransportError::PatternMismatch { .. })
    ));
}

#[tokio::test]
async fn double_bind_is_an_error() {
    let ctx = Context::new();
    let _first = ctx.pull::<TestMsg>("inproc://dup", 4).await.expect("bind");
    assert!(matches!(
        ctx.pull::<TestMsg>("inproc://dup", 4).await,
        Err(TransportError::AlreadyBound(_))
    ));
}

#[tokio::test]
async fn req_rep_inproc_pairs_replies_with_requests() {
    let ctx = Context::new();
    let mut rep = ctx
        .rep::<TestMsg, TestMsg>("inproc://rr", 4)
        .await
        .expect("bind");
    let server = tokio::spawn(async move {
        for _ in 0..4 {
            let request = rep.recv().await.expect("recv").expect("schema");
            let TestMsg::Ping(n) = request else {
                panic!("unexpected request {request:?}");
            };
            rep.send(&TestMsg::Pong(n)).await.expect("reply");
        }
    });

    // Two clients interleaved: replies must go back to the asker.
    let mut req_a = ctx
        .req::<TestMsg, TestMsg>("inproc://rr")
        .await
        .expect("connect");
    let mut req_b = ctx
        .req::<TestMsg, TestMsg>("inproc://rr")
        .await
        .expect("connect");
    assert_eq!(
        req_a.request(&TestMsg::Ping(1)).await.expect("turn"),
        TestMsg::Pong(1)
    );
    assert_eq!(
        req_b.request(&TestMsg::Ping(2)).await.expect("turn"),
        TestMsg::Pong(2)
    );
    assert_eq!(
        req_a.request(&TestMsg::Ping(3)).await.expect("turn"),
        TestMsg::Pong(3)
    );
    assert_eq!(
        req_b.request(&TestMsg::Ping(4)).await.expect("turn"),
        TestMsg::Pong(4)
    );
    server.await.expect("server");
}

#[tokio::test]
async fn pub_sub_inproc_fans_out() {
    let ctx = Context::new();
    let publisher = ctx
        .publish::<TestMsg>("inproc://fan", 16)
        .await
        .expect("bind");
    let mut sub_a = ctx.subscribe::<TestMsg>("inproc://fan").await.expect("sub");
    let mut sub_b = ctx.subscribe::<TestMsg>("inproc://fan").await.expect("sub");
    publisher.send(&TestMsg::Ping(7)).await.expect("publish");
    assert_eq!(sub_a.recv().await.expect("recv"), TestMsg::Ping(7));
    assert_eq!(sub_b.recv().await.expect("recv"), TestMsg::Ping(7));
}

#[tokio::test]
async fn publish_without_subscribers_is_dropped_not_an_error() {
    let ctx = Context::new();
    let publisher = ctx
        .publish::<TestMsg>("inproc://lonely", 4)
        .await
        .expect("bind");
    publisher.send(&TestMsg::Ping(1)).await.expect("publish");
}

#[tokio::test]
async fn router_dealer_tcp_roundtrip() {
    let ctx = Context::new();
    let mut router = ctx
        .router::<TestMsg, TestMsg>("tcp://127.0.0.1:0", 16)
        .await
        .expect("bind");
    let addr = format!("tcp://{}", router.local_addr());

    let mut dealer = ctx
        .dealer::<TestMsg, TestMsg>(&addr)
        .await
        .expect("connect");
    dealer.send(&TestMsg::Ping(9)).await.expect("send");

    let (identity, request) = router.recv().await.expect("recv");
    assert_eq!(request.expect("schema"), TestMsg::Ping(9));
    router
        .send(identity, &TestMsg::Pong(9))
        .await
        .expect("reply");
    assert_eq!(dealer.recv().await.expect("recv"), TestMsg::Pong(9));
}

#[tokio::test]
async fn router_distinguishes_peers() {
    let ctx = Context::new();
    let mut router = ctx
        .router::<TestMsg, TestMsg>("tcp://127.0.0.1:0", 16)
        .await
        .expect("bind");
    let addr = format!("tcp://{}", router.local_addr());

    let mut dealer_a = ctx.dealer::<TestMsg, TestMsg>(&addr).await.expect("a");
    let mut dealer_b = ctx.dealer::<TestMsg, TestMsg>(&addr).await.expect("b");
    dealer_a.send(&TestMsg::Ping(1)).await.expect("send");
    let (id_a, _) = router.recv().await.expect("recv");
    dealer_b.send(&TestMsg::Ping(2)).await.expect("send");
    let (id_b, _) = router.recv().await.expect("recv");
    assert_ne!(id_a, id_b);

    router.send(id_b, &TestMsg::Pong(2)).await.expect("to b");
    router.send(id_a, &TestMsg::Pong(1)).await.expect("to a");
    assert_eq!(dealer_a.recv().await.expect("recv"), TestMsg::Pong(1));
    assert_eq!(dealer_b.recv().await.expect("recv"), TestMsg::Pong(2));
}

#[tokio::test]
async fn router_surfaces_schema_violations_with_identity() {
    let ctx = Context::new();
    let mut router = ctx
        .router::<TestMsg, TestMsg>("tcp://127.0.0.1:0", 16)
        .await
        .expect("bind");
    let addr = format!("tcp://{}", router.local_addr());

    // A "dealer" whose messages decode as garbage on the router side.
    #[derive(Debug)]
    struct Garbage;
    impl Wire for Garbage {
        fn to_frames(&self) -> Frames {
            vec![Bytes::from_static(b"NONSENSE")]
        }
        fn from_frames(_: &[Bytes]) -> Result<Self, WireError> {
            Ok(Garbage)
        }
    }
    let mut dealer = ctx.dealer::<Garbage, TestMsg>(&addr).await.expect("connect");
    dealer.send(&Garbage).await.expect("send");

    let (_identity, request) = router.recv().await.expect("recv");
    assert!(request.is_err());
}

#[tokio::test]
async fn pull_tcp_merges_pushers() {
    let ctx = Context::new();
    let mut pull = ctx
        .pull::<TestMsg>("tcp://127.0.0.1:0", 16)
        .await
        .expect("bind");
    let addr = format!("tcp://{}", pull.local_addr().expect("tcp addr"));

    let mut push_a = ctx.push::<TestMsg>(&addr).await.expect("a");
    let mut push_b = ctx.push::<TestMsg>(&addr).await.expect("b");
    push_a.send(&TestMsg::Ping(1)).await.expect("send");
    push_b.send(&TestMsg::Ping(2)).await.expect("send");

    let mut got = vec![
        pull.recv().await.expect("recv"),
        pull.recv().await.expect("recv"),
    ];
    got.sort_by_key(|m| match m {
        TestMsg::Ping(n) | TestMsg::Pong(n) => *n,
    });
    assert_eq!(got, vec![TestMsg::Ping(1), TestMsg::Ping(2)]);
}

#[tokio::test]
async fn pub_sub_tcp_fans_out() {
    let ctx = Context::new();
    let publisher = ctx
        .publish::<TestMsg>("tcp://127.0.0.1:0", 16)
        .await
        .expect("bind");
    let addr = format!("tcp://{}", publisher.local_addr().expect("tcp addr"));

    let mut sub = ctx.subscribe::<TestMsg>(&addr).await.expect("sub");
    // Give the accept loop a beat to register the subscriber.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    publisher.send(&TestMsg::Ping(3)).await.expect("publish");
    assert_eq!(sub.recv().await.expect("recv"), TestMsg::Ping(3));
}
