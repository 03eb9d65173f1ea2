use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use kiosklink_control::{
    ChannelConfig, CommandCallback, CommandDispatcher, CommandResult, ControlChannel,
    DeviceEvent, EndReason,
};

fn fast_config(port: u16) -> ChannelConfig {
    let mut config = ChannelConfig::new("127.0.0.1", port);
    config.reconnect_delay = Duration::from_millis(50);
    config.read_timeout = Duration::from_millis(50);
    config
}

/// Device that answers every command with a JSON response, then pushes one
/// legacy analysis line and hangs up.
fn spawn_device(listener: TcpListener, commands: usize) -> thread::JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let (conn, _) = listener.accept().unwrap();
        let mut writer = conn.try_clone().unwrap();
        let mut reader = BufReader::new(conn);
        let mut received = Vec::new();

        for _ in 0..commands {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end().to_string();
            let id = line.split(':').nth(1).unwrap().to_string();
            let response = format!(
                "{{\"type\":\"command_response\",\"command_id\":\"{id}\",\"success\":true,\"message\":\"done\",\"data\":{{\"echo\":\"{line}\"}}}}\n"
            );
            writer.write_all(response.as_bytes()).unwrap();
            received.push(line);
        }

        writer.write_all(b"ripe:97%\n").unwrap();
        received
    })
}

#[test]
fn commands_round_trip_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = spawn_device(listener, 2);

    let channel = Arc::new(ControlChannel::new(fast_config(port)));
    channel.connect().unwrap();
    let dispatcher = Arc::new(CommandDispatcher::new(channel.clone()).unwrap());

    let (events_tx, events) = unbounded();
    let receiver = {
        let channel = Arc::clone(&channel);
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            channel
                .receive_loop(|line| {
                    if let Some(event) = dispatcher.handle_line(line) {
                        let _ = events_tx.send(event);
                    }
                })
                .unwrap()
        })
    };

    let (results_tx, results) = unbounded();
    for lines in [10, 20] {
        let tx = results_tx.clone();
        let callback: CommandCallback = Box::new(move |result: CommandResult| {
            let _ = tx.send(result);
        });
        dispatcher.send_show_logs(lines, Some(callback));
    }

    let mut messages: Vec<CommandResult> = (0..2)
        .map(|_| results.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    messages.sort_by_key(|result| result.data["echo"].as_str().is_some_and(|echo| echo.ends_with(":20")));
    assert!(messages.iter().all(|result| result.success && result.message == "done"));
    assert!(messages[0].data["echo"].as_str().unwrap().ends_with(":10"));
    assert!(messages[1].data["echo"].as_str().unwrap().ends_with(":20"));

    assert_eq!(
        events.recv_timeout(Duration::from_secs(5)).unwrap(),
        DeviceEvent::Analysis {
            label: "ripe".to_string(),
            confidence: "97%".to_string(),
        }
    );

    let received = device.join().unwrap();
    assert!(received.iter().all(|line| line.starts_with("SHOW_LOGS:cmd_")));

    let end = receiver.join().unwrap();
    assert!(matches!(end.reason, EndReason::PeerClosed));
    assert_eq!(dispatcher.pending_count(), 0);
}

#[test]
fn lost_connection_abandons_its_commands() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    // Reads one command and hangs up without answering.
    let device = thread::spawn(move || {
        let (conn, _) = listener.accept().unwrap();
        let mut line = String::new();
        BufReader::new(conn).read_line(&mut line).unwrap();
        line
    });

    let channel = Arc::new(ControlChannel::new(fast_config(port)));
    channel.connect().unwrap();
    let dispatcher = CommandDispatcher::new(channel.clone()).unwrap();

    let (tx, results) = unbounded();
    let callback: CommandCallback = Box::new(move |result: CommandResult| {
        let _ = tx.send(result);
    });
    dispatcher.send_capture(Some(callback));
    assert!(device.join().unwrap().starts_with("CAPTURE:cmd_"));

    let end = channel
        .receive_loop(|line| {
            dispatcher.handle_line(line);
        })
        .unwrap();
    assert_eq!(dispatcher.abandon_connection(end.generation, "Connection lost"), 1);

    let result = results.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(!result.success);
    assert_eq!(result.message, "Connection lost");
}
