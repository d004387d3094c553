//! Accepted-child hand-off and accept-path backpressure.

mod common;

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tidewire::endpoint::{Endpoint, EndpointOption, TcpServerEndpoint};
use tidewire::executor::ExecutorPool;
use tidewire::test_utils::StubEndpoint;
use tidewire::{Error, ServerBootstrap, ACCEPT_RECOVERY_DELAY};

use common::{init_test_logging, wait_until};

struct NoopHandler;
impl tidewire::Handler for NoopHandler {}

fn server(
    pool: &Arc<ExecutorPool>,
    workers: &Arc<ExecutorPool>,
    factory: impl Fn() -> Result<Arc<dyn Endpoint>, Error> + Send + Sync + 'static,
) -> ServerBootstrap {
    ServerBootstrap::new()
        .pool(Arc::clone(pool))
        .worker_pool(Arc::clone(workers))
        .factory(factory)
        .child_handler(Arc::new(NoopHandler))
}

#[test]
fn accepted_child_lands_on_the_worker_pool() {
    init_test_logging();
    let pool = ExecutorPool::with_prefix(1, "acceptor").expect("acceptor pool");
    let workers = ExecutorPool::with_prefix(2, "worker").expect("worker pool");

    let acceptor = TcpServerEndpoint::new();
    let factory_acceptor = Arc::clone(&acceptor);
    let bound = server(&pool, &workers, move || {
        Ok(Arc::clone(&factory_acceptor) as Arc<dyn Endpoint>)
    })
    .option(EndpointOption::ReuseAddr(true))
    .bind_to("127.0.0.1:0".parse().expect("literal address"))
    .expect("configuration is complete");
    bound.sync().expect("bind succeeds");

    let local = acceptor.local_addr().expect("bound address");
    let _client = TcpStream::connect(local).expect("connect to acceptor");

    let mut child = None;
    assert!(wait_until(Duration::from_secs(2), || {
        match acceptor.accept_now() {
            Ok(Some(accepted)) => {
                child = Some(accepted);
                true
            }
            Ok(None) => false,
            Err(err) => panic!("accept failed: {err}"),
        }
    }));
    let child = child.expect("accepted child");

    // Hand-off attached the child handler and registered it with the workers.
    assert_eq!(child.chain().len(), 1);
    assert!(wait_until(Duration::from_secs(1), || child.is_registered()));
    assert!(child.is_open());

    acceptor.close();
    workers.shutdown();
    pool.shutdown();
}

#[test]
fn child_registration_failure_closes_only_the_child() {
    init_test_logging();
    let pool = ExecutorPool::with_prefix(1, "acceptor").expect("acceptor pool");
    let workers = ExecutorPool::with_prefix(1, "worker").expect("worker pool");

    let acceptor_stub = StubEndpoint::new();
    let factory_stub = Arc::clone(&acceptor_stub);
    let registration = server(&pool, &workers, move || {
        Ok(Arc::clone(&factory_stub) as Arc<dyn Endpoint>)
    })
    .register()
    .expect("configuration is complete");
    let acceptor = registration.sync().expect("acceptor registers");

    let child: Arc<dyn Endpoint> = StubEndpoint::failing_registration();
    acceptor.chain().fire_child_accepted(&acceptor, Arc::clone(&child));

    assert!(wait_until(Duration::from_secs(1), || !child.is_open()));
    assert!(acceptor.is_open());
    workers.shutdown();
    pool.shutdown();
}

#[test]
fn accept_failure_pauses_accepts_then_recovers() {
    init_test_logging();
    let pool = ExecutorPool::with_prefix(1, "acceptor").expect("acceptor pool");
    let workers = ExecutorPool::with_prefix(1, "worker").expect("worker pool");

    let acceptor_stub = StubEndpoint::new();
    let factory_stub = Arc::clone(&acceptor_stub);
    let registration = server(&pool, &workers, move || {
        Ok(Arc::clone(&factory_stub) as Arc<dyn Endpoint>)
    })
    .register()
    .expect("configuration is complete");
    let acceptor = registration.sync().expect("acceptor registers");
    assert!(acceptor.auto_read());

    acceptor
        .chain()
        .fire_exception(&acceptor, &Error::from(std::io::Error::other("emfile")));
    assert!(!acceptor.auto_read());

    // Auto-read comes back via a timer on the acceptor's own context.
    assert!(wait_until(
        ACCEPT_RECOVERY_DELAY + Duration::from_millis(500),
        || acceptor.auto_read()
    ));
    workers.shutdown();
    pool.shutdown();
}
