//! Native clients talking to a live relay on a loopback port.

use boardlog_core::{
    Action, HttpLogSource, NativeChannel, SessionState, ShapeVariant, VectorSurface, Whiteboard,
    WhiteboardConfig,
};
use boardlog_server::{AppState, ServerConfig, app};
use kurbo::Point;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Board = Whiteboard<VectorSurface, NativeChannel, HttpLogSource>;

async fn start_server() -> (SocketAddr, Arc<AppState>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::new(ServerConfig::default()));
    let served = state.clone();
    tokio::spawn(async move {
        axum::serve(listener, app(served)).await.unwrap();
    });
    (addr, state)
}

fn board(addr: SocketAddr) -> Board {
    Whiteboard::new(
        VectorSurface::new(),
        NativeChannel::new(format!("ws://{}/ws", addr)),
        HttpLogSource::new(format!("http://{}", addr)).unwrap(),
        &WhiteboardConfig::default(),
    )
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "Timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn join(board: &mut Board, user_id: &str) {
    board.join("room", user_id).unwrap();
    wait_until("catch-up", || {
        board.pump();
        board.session().state() == SessionState::Live
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_joiner_sees_the_same_board() {
    let (addr, _) = start_server().await;

    tokio::task::spawn_blocking(move || {
        let mut alice = board(addr);
        join(&mut alice, "alice");

        alice.commit(Action::path(vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)]));
        alice.commit(Action::shape(
            ShapeVariant::Rectangle,
            Point::new(0.0, 0.0),
            Point::new(5.0, 5.0),
        ));
        wait_until("acks", || {
            alice.pump();
            alice.session().last_acked() == 2
        });

        let mut bob = board(addr);
        join(&mut bob, "bob");
        assert_eq!(bob.surface(), alice.surface());
        assert_eq!(bob.session().last_applied(), 2);

        alice.commit(Action::text("hi", Point::new(2.0, 2.0)));
        wait_until("live action", || {
            bob.pump();
            bob.surface().primitive_count() == 3
        });
        assert_eq!(bob.surface(), alice.surface());

        bob.clear();
        wait_until("remote clear", || {
            alice.pump();
            alice.surface().is_blank()
        });

        alice.leave();
        bob.leave();
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_boards_converge_with_a_late_joiner() {
    let (addr, _) = start_server().await;

    tokio::task::spawn_blocking(move || {
        let mut alice = board(addr);
        let mut bob = board(addr);
        join(&mut alice, "alice");
        join(&mut bob, "bob");

        for i in 0..3 {
            let x = i as f64 * 10.0;
            alice.commit(Action::text("a", Point::new(x, 0.0)));
            bob.commit(Action::shape(
                ShapeVariant::Circle,
                Point::new(x, 20.0),
                Point::new(x + 5.0, 25.0),
            ));
        }
        wait_until("both boards settle", || {
            alice.pump();
            bob.pump();
            alice.history().unacknowledged() == 0
                && bob.history().unacknowledged() == 0
                && alice.surface().primitive_count() == 6
                && bob.surface().primitive_count() == 6
        });
        assert_eq!(alice.surface(), bob.surface());

        let mut carol = board(addr);
        join(&mut carol, "carol");
        assert_eq!(carol.surface(), alice.surface());

        alice.leave();
        bob.leave();
        carol.leave();
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ending_a_session_disconnects_its_members() {
    let (addr, state) = start_server().await;

    tokio::task::spawn_blocking(move || {
        let mut alice = board(addr);
        join(&mut alice, "alice");
        alice.commit(Action::text("agenda", Point::ZERO));
        wait_until("ack", || {
            alice.pump();
            alice.session().last_acked() == 1
        });

        assert!(state.end_session("room"));
        wait_until("session end", || {
            alice.pump();
            alice.session().state() == SessionState::Disconnected
        });
        assert!(alice.session().session_id().is_none());
        assert_eq!(alice.surface().primitive_count(), 1);
    })
    .await
    .unwrap();
}
