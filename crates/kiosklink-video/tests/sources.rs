use std::io::Write;
use std::net::{TcpListener, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use crossbeam_channel::{unbounded, Receiver};
use kiosklink_frame::{encode_record, fragment_payload, Frame};
use kiosklink_video::{DatagramConfig, StreamConfig, VideoConfig, VideoSource};

fn collect_frames(source: &dyn VideoSource) -> Receiver<Frame> {
    let (tx, rx) = unbounded();
    source.set_frame_handler(Arc::new(move |frame: Frame| {
        let _ = tx.send(frame);
    }));
    rx
}

#[test]
fn datagram_source_through_trait_object() {
    let mut config = DatagramConfig::new("127.0.0.1", 0);
    config.recv_timeout = Duration::from_millis(50);
    let source = VideoConfig::Datagram(config).into_source();
    let frames = collect_frames(source.as_ref());
    source.start().unwrap();

    let port = source.registration_port().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    for frame_id in [1u32, 2] {
        let payload = vec![frame_id as u8; 5000];
        for datagram in fragment_payload(frame_id, &payload, 4096).unwrap() {
            sender.send_to(&datagram, ("127.0.0.1", port)).unwrap();
        }
    }

    let first = frames.recv_timeout(Duration::from_secs(2)).unwrap();
    let second = frames.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(first.len(), 5000);
    assert_eq!(second.len(), 5000);
    assert_ne!(first.bytes[0], second.bytes[0]);

    source.stop();
    assert!(!source.is_running());
}

#[test]
fn stream_source_through_trait_object() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        let mut buf = BytesMut::new();
        for payload in [&b"frame-one"[..], &b"frame-two"[..]] {
            encode_record(payload, &mut buf).unwrap();
        }
        conn.write_all(&buf).unwrap();
        std::thread::sleep(Duration::from_millis(200));
    });

    let mut config = StreamConfig::new("127.0.0.1", port);
    config.read_timeout = Duration::from_millis(50);
    config.reconnect_delay = Duration::from_millis(50);
    let source = VideoConfig::Stream(config).into_source();
    let frames = collect_frames(source.as_ref());
    source.start().unwrap();

    assert_eq!(
        frames.recv_timeout(Duration::from_secs(2)).unwrap().bytes.as_ref(),
        b"frame-one"
    );
    assert_eq!(
        frames.recv_timeout(Duration::from_secs(2)).unwrap().bytes.as_ref(),
        b"frame-two"
    );

    server.join().unwrap();
    source.stop();
}
