//! Integration tests for requests and the completion sink.

use capq::model::{Image, Outcome};
use capq::request::{Completion, Request};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Calls {
    success: AtomicUsize,
    failure: AtomicUsize,
    last_failure: Mutex<Option<String>>,
}

fn counting(calls: &Arc<Calls>) -> Completion {
    let (ok, err) = (Arc::clone(calls), Arc::clone(calls));
    Completion::from_handlers(
        move |_image| {
            ok.success.fetch_add(1, Ordering::SeqCst);
        },
        move |reason| {
            err.failure.fetch_add(1, Ordering::SeqCst);
            *err.last_failure.lock().unwrap() = Some(reason);
        },
    )
}

#[test]
fn success_calls_only_the_success_handler() {
    let calls = Arc::new(Calls::default());
    counting(&calls).resolve(Outcome::Success(Image::new("frame")));

    assert_eq!(calls.success.load(Ordering::SeqCst), 1);
    assert_eq!(calls.failure.load(Ordering::SeqCst), 0);
}

#[test]
fn failure_calls_only_the_failure_handler() {
    let calls = Arc::new(Calls::default());
    counting(&calls).fail("sensor timeout");

    assert_eq!(calls.success.load(Ordering::SeqCst), 0);
    assert_eq!(calls.failure.load(Ordering::SeqCst), 1);
    assert_eq!(
        calls.last_failure.lock().unwrap().as_deref(),
        Some("sensor timeout")
    );
}

#[test]
fn dropping_unresolved_completion_reports_abandonment() {
    let calls = Arc::new(Calls::default());
    drop(counting(&calls));

    assert_eq!(calls.success.load(Ordering::SeqCst), 0);
    assert_eq!(calls.failure.load(Ordering::SeqCst), 1);
    assert_eq!(
        calls.last_failure.lock().unwrap().as_deref(),
        Some("request abandoned before completion")
    );
}

#[test]
fn handlers_may_run_on_another_thread() {
    let calls = Arc::new(Calls::default());
    let completion = counting(&calls);

    std::thread::spawn(move || completion.resolve(Outcome::Success(Image::new("frame"))))
        .join()
        .unwrap();

    assert_eq!(calls.success.load(Ordering::SeqCst), 1);
    assert_eq!(calls.failure.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ticket_resolves_to_the_delivered_outcome() {
    let (request, ticket) = Request::with_ticket(4);
    assert_eq!(request.id, ticket.id());
    assert_eq!(request.urgency, 4);

    request
        .completion
        .resolve(Outcome::Success(Image::new("frame")));

    let image = ticket.await.into_result().unwrap();
    assert_eq!(image.data(), b"frame");
}

#[tokio::test]
async fn ticket_of_dropped_request_reports_abandonment() {
    let (request, ticket) = Request::with_ticket(1);
    drop(request);

    assert_eq!(
        ticket.await,
        Outcome::Failure("request abandoned before completion".to_string())
    );
}

#[test]
fn resolving_after_ticket_dropped_is_harmless() {
    let (request, ticket) = Request::with_ticket(1);
    drop(ticket);
    request.completion.fail("nobody listening");
}

#[test]
fn panicking_handler_does_not_unwind_into_the_resolver() {
    let completion = Completion::from_handlers(|_| panic!("success handler"), |_| {});
    completion.resolve(Outcome::Success(Image::new("frame")));

    let completion = Completion::from_handlers(|_| {}, |_| panic!("failure handler"));
    drop(completion);
}

#[test]
fn image_is_shared_not_copied() {
    let image = Image::new(vec![1u8, 2, 3]);
    let copy = image.clone();
    assert_eq!(image, copy);
    assert_eq!(copy.len(), 3);
    assert!(std::ptr::eq(image.data().as_ptr(), copy.data().as_ptr()));
}
