//! Loopback tests for the link roles and the full ingest pipeline

mod common;

use phms::codec::{WireFormat, compact, tagged};
use phms::transport::{Client, Communicator, Server};
use tokio::io::AsyncWriteExt;
use phms::types::Frame;
use phms::{IngestError, LinkConfig, Pipeline, PipelineConfig, ReadFrom};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_frames_arrive_at_server_in_order() {
    common::init_tracing();

    let mut server = Server::new(common::fast_link());
    let address = server.listen().await.unwrap();

    let mut client = Client::new(common::fast_link());
    client.open(&address.to_string()).await.unwrap();
    server.open().await.unwrap();
    assert_eq!(client.peer_address(), Some(address));
    assert!(server.state().connected);

    let outbound = client.handle();
    let inbound = server.handle();
    let client_task = tokio::spawn(async move {
        client.run().await;
        client
    });
    let server_task = tokio::spawn(async move {
        server.run().await;
        server
    });

    for n in 0..5u8 {
        outbound.push(Frame::new(vec![n; usize::from(n) + 1]).unwrap());
    }
    assert!(common::eventually(|| inbound.available() == 5).await);

    let frames = inbound.get_all();
    let lengths: Vec<usize> = frames.iter().map(Frame::len).collect();
    assert_eq!(lengths, vec![1, 2, 3, 4, 5]);
    assert_eq!(inbound.available(), 0);

    outbound.quit();
    inbound.quit();
    let mut client = client_task.await.unwrap();
    let mut server = server_task.await.unwrap();
    assert!(client.state().quit_requested);
    assert!(inbound.is_closed());

    client.close();
    server.close();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn push_before_open_is_never_sent() {
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut client = Client::new(LinkConfig::default());
    client.push(Frame::new(vec![0x01]).unwrap());

    let err = client.open(&dead.to_string()).await.unwrap_err();
    assert!(matches!(err, IngestError::Connection { .. }));
    assert!(!client.is_connected());

    client.run().await;
    assert_eq!(client.handle().pending(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peer_hangup_ends_server_loop() {
    let mut server = Server::new(common::fast_link());
    let address = server.listen().await.unwrap();
    let mut client = Client::new(common::fast_link());
    client.open(&address.to_string()).await.unwrap();
    server.open().await.unwrap();

    let inbound = server.handle();
    let server_task = tokio::spawn(async move { server.run().await });

    client.close();
    server_task.await.unwrap();
    assert!(inbound.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_inbound_frame_is_dropped_and_link_stays_up() {
    common::init_tracing();

    let mut server = Server::new(common::fast_link());
    let address = server.listen().await.unwrap();
    let mut peer = tokio::net::TcpStream::connect(address).await.unwrap();
    server.open().await.unwrap();

    let inbound = server.handle();
    let server_task = tokio::spawn(async move {
        server.run().await;
        server
    });

    // 1100-byte payload, over the 1024-byte limit
    let mut bytes = vec![0x04, 0x4c];
    bytes.extend(std::iter::repeat_n(0xee, 1100));
    bytes.extend_from_slice(&[0x00, 0x03, 1, 2, 3]);
    peer.write_all(&bytes).await.unwrap();

    assert!(common::eventually(|| inbound.available() == 1).await);
    assert_eq!(inbound.get_all()[0].data().as_ref(), &[1, 2, 3]);
    assert!(!inbound.is_closed());
    assert!(!server_task.is_finished());

    peer.write_all(&[0x00, 0x01, 9]).await.unwrap();
    assert!(common::eventually(|| inbound.available() == 1).await);
    assert_eq!(inbound.get_all()[0].data().as_ref(), &[9]);

    inbound.quit();
    let mut server = server_task.await.unwrap();
    assert!(inbound.is_closed());
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_send_does_not_stop_client_loop() {
    common::init_tracing();

    let mut server = Server::new(common::fast_link());
    let address = server.listen().await.unwrap();
    let mut client = Client::new(LinkConfig { max_frame_size: 8, ..common::fast_link() });
    client.open(&address.to_string()).await.unwrap();
    server.open().await.unwrap();

    let outbound = client.handle();
    let inbound = server.handle();
    let client_task = tokio::spawn(async move {
        client.run().await;
        client
    });
    let server_task = tokio::spawn(async move {
        server.run().await;
        server
    });

    // Rejected by the size limit, then a frame that fits
    outbound.push(Frame::new(vec![0xff; 16]).unwrap());
    outbound.push(Frame::new(b"after".to_vec()).unwrap());

    assert!(common::eventually(|| inbound.available() == 1).await);
    assert_eq!(inbound.get_all()[0].data().as_ref(), b"after");
    assert_eq!(outbound.pending(), 0);
    assert!(!client_task.is_finished());

    outbound.push(Frame::new(b"again".to_vec()).unwrap());
    assert!(common::eventually(|| inbound.available() == 1).await);
    assert_eq!(inbound.get_all()[0].data().as_ref(), b"again");

    outbound.quit();
    inbound.quit();
    let mut client = client_task.await.unwrap();
    let mut server = server_task.await.unwrap();
    assert!(client.state().quit_requested);
    client.close();
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn communicators_open_both_directions() {
    common::init_tracing();

    let mut host = Communicator::new(common::fast_link());
    let mut node = Communicator::new(common::fast_link());
    let host_address = host.listen().await.unwrap().to_string();
    let node_address = node.listen().await.unwrap().to_string();

    let (host_open, node_open) = tokio::join!(
        host.open(&node_address, Some(20)),
        node.open(&host_address, Some(20))
    );
    host_open.unwrap();
    node_open.unwrap();
    assert!(host.client_address().is_some());
    assert!(host.server_address().is_some());

    host.run().unwrap();
    node.run().unwrap();
    assert!(host.is_running());

    host.push(Frame::new(b"to node".to_vec()).unwrap());
    node.push(Frame::new(b"to host".to_vec()).unwrap());

    assert!(common::eventually(|| node.available() == 1 && host.available() == 1).await);
    assert_eq!(node.get_all()[0].data().as_ref(), b"to node");
    assert_eq!(host.get_all()[0].data().as_ref(), b"to host");

    host.quit().await.unwrap();
    node.close().await.unwrap();
    host.close().await.unwrap();
    assert!(!host.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pipeline_ingests_frames_from_sensor_node() {
    common::init_tracing();

    let mut config = PipelineConfig::default();
    config.link = LinkConfig { channel: common::free_port(), ..common::fast_link() };
    config.store.capacity = 128;
    config.ingest.max_connect_tries = Some(50);
    let host_address = format!("127.0.0.1:{}", config.link.channel);

    let mut node = Communicator::new(common::fast_link());
    let node_address = node.listen().await.unwrap().to_string();

    let (pipeline, node_open) = tokio::join!(
        Pipeline::connect(&node_address, &config),
        node.open(&host_address, Some(50))
    );
    let (pipeline, _outbound) = pipeline.unwrap();
    node_open.unwrap();
    node.run().unwrap();

    let mut persistence = pipeline.subscribe();
    let mut display = pipeline.subscribe_at(ReadFrom::Latest);

    let readings = common::sequence(1_000, 40);
    for frame in tagged::encode_chunked(&readings, phms::MAX_FRAME_SIZE).unwrap() {
        node.push(frame);
    }
    // Malformed frame: unknown tag
    node.push(Frame::new(vec![0x7f, 0x00]).unwrap());

    assert!(common::eventually(|| pipeline.store().write_count() == 40).await);
    assert!(common::eventually(|| pipeline.stats().rejected_frames == 1).await);

    assert_eq!(persistence.drain().readings, readings);
    assert_eq!(display.drain().readings, readings);
    assert!(persistence.drain().is_empty());

    // Outbound direction uses the same codec
    let sent = pipeline.send_readings(&readings[..3]).unwrap();
    assert_eq!(sent, 1);
    assert!(common::eventually(|| node.available() == 1).await);
    let echoed = tagged::decode(&node.get_all()[0]).unwrap();
    assert_eq!(echoed, readings[..3].to_vec());

    node.close().await.unwrap();
    let stats = pipeline.shutdown().await.unwrap();
    assert_eq!(stats.readings_written, 40);
    assert_eq!(stats.rejected_frames, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn compact_link_is_decoded_with_source() {
    let mut config = PipelineConfig::default();
    config.link = LinkConfig { channel: common::free_port(), ..common::fast_link() };
    config.ingest.wire_format = WireFormat::Compact;
    let host_address = format!("127.0.0.1:{}", config.link.channel);

    let mut node = Communicator::new(common::fast_link());
    let node_address = node.listen().await.unwrap().to_string();
    let (pipeline, node_open) = tokio::join!(
        Pipeline::connect(&node_address, &config),
        node.open(&host_address, Some(50))
    );
    let (pipeline, _outbound) = pipeline.unwrap();
    node_open.unwrap();
    node.run().unwrap();

    let mut reader = pipeline.subscribe();
    let samples = common::sequence(0, 6)
        .into_iter()
        .map(|r| r.with(phms::Field::IrLed, 14_000.0).with(phms::Field::Spo2, 98.0))
        .collect::<Vec<_>>();
    node.push(compact::encode(2, &samples).unwrap());

    assert!(common::eventually(|| pipeline.store().write_count() == 6).await);
    let drain = reader.drain();
    assert!(drain.readings.iter().all(|r| r.source == phms::SourceType::BtDataSensor));
    assert!(drain.readings.iter().all(|r| r.ir_led == Some(14_000.0) && r.spo2 == Some(98.0)));
    assert!(drain.readings.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));

    node.close().await.unwrap();
    pipeline.shutdown().await.unwrap();
}
