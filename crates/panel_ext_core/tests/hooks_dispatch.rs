use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use panel_ext_core::{catch_intercept, intercept, HookDispatcher, HookError, RequestOutcome};
use serde_json::{json, Value};

fn tag(
    tag: &'static str,
) -> impl Fn(Value, &[Value]) -> Result<Value, HookError> + Send + Sync + 'static {
    move |value: Value, _args: &[Value]| {
        let mut text = value.as_str().unwrap_or_default().to_string();
        text.push_str(tag);
        Ok(Value::String(text))
    }
}

#[test]
fn filters_run_in_priority_order() {
    let hooks = HookDispatcher::new();
    hooks.register_filter_at("order.total", 30, tag("c"));
    hooks.register_filter_at("order.total", 10, tag("a"));
    hooks.register_filter_at("order.total", 20, tag("b"));

    let result = hooks.filter("order.total", json!(">"), &[]).unwrap();
    assert_eq!(result, json!(">abc"));
}

#[test]
fn equal_priorities_keep_registration_order_and_do_not_deduplicate() {
    let hooks = HookDispatcher::new();
    hooks.register_filter("greeting", tag("x"));
    hooks.register_filter("greeting", tag("y"));
    hooks.register_filter("greeting", tag("x"));

    assert_eq!(hooks.listener_count("greeting"), 3);
    assert_eq!(hooks.filter("greeting", json!(""), &[]).unwrap(), json!("xyx"));
}

#[test]
fn unregistered_filter_returns_value_unchanged() {
    let hooks = HookDispatcher::new();
    let value = json!({ "price": 12, "currency": "EUR" });

    assert_eq!(
        hooks.filter("unregistered.hook", value.clone(), &[]).unwrap(),
        value
    );
}

#[test]
fn failing_action_listener_does_not_stop_later_listeners() {
    let hooks = HookDispatcher::new();
    let reached = Arc::new(AtomicUsize::new(0));

    hooks.register_at("user.login.after", 10, |_args| {
        Err(HookError::failed("mailer offline"))
    });
    let counter = Arc::clone(&reached);
    hooks.register_at("user.login.after", 20, move |_args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    hooks.call("user.login.after", &[json!(1)]).unwrap();
    assert_eq!(reached.load(Ordering::SeqCst), 1);
}

#[test]
fn intercept_in_filter_stops_chain_and_reaches_caller() {
    let hooks = HookDispatcher::new();
    let later = Arc::new(AtomicUsize::new(0));

    hooks.register_filter_at("checkout.render", 10, |_value, _args| {
        intercept(json!({ "redirect": "/maintenance" }))
    });
    let counter = Arc::clone(&later);
    hooks.register_filter_at("checkout.render", 20, move |value, _args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    });

    let err = hooks
        .filter("checkout.render", json!("page"), &[])
        .unwrap_err();
    assert_eq!(later.load(Ordering::SeqCst), 0);
    match err {
        HookError::Intercepted(signal) => {
            assert_eq!(signal.response(), &json!({ "redirect": "/maintenance" }));
        }
        other => panic!("expected intercept, got {other}"),
    }
}

#[test]
fn intercept_in_action_aborts_broadcast() {
    let hooks = HookDispatcher::new();
    let later = Arc::new(AtomicUsize::new(0));

    hooks.register_at("ticket.reply", 5, |_args| intercept(json!("handled")));
    let counter = Arc::clone(&later);
    hooks.register_at("ticket.reply", 6, move |_args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let signal = hooks.call("ticket.reply", &[]).unwrap_err();
    assert_eq!(signal.into_response(), json!("handled"));
    assert_eq!(later.load(Ordering::SeqCst), 0);
}

#[test]
fn failing_filter_listener_propagates() {
    let hooks = HookDispatcher::new();
    hooks.register_filter("price", |_value, _args| Err(HookError::failed("bad rate")));

    let err = hooks.filter("price", json!(10), &[]).unwrap_err();
    assert!(matches!(err, HookError::Filter { ref hook, position: 0, .. } if hook == "price"));
    assert!(!err.is_intercept());
}

#[test]
fn request_boundary_turns_intercept_into_response() {
    let hooks = HookDispatcher::new();
    hooks.register_filter("user.register.before", |_value, args| {
        if args.first() == Some(&json!("blocked@example.com")) {
            return intercept(json!({ "status": 403 }));
        }
        Ok(json!(true))
    });

    let handle = |email: &str| {
        catch_intercept(
            hooks
                .filter("user.register.before", json!(false), &[json!(email)])
                .map(|allowed| allowed.as_bool().unwrap_or(false)),
        )
        .unwrap()
    };

    assert_eq!(handle("ok@example.com"), RequestOutcome::Completed(true));
    assert_eq!(
        handle("blocked@example.com"),
        RequestOutcome::Intercepted(json!({ "status": 403 }))
    );
}

#[test]
fn remove_and_remove_owner_drop_listeners() {
    let hooks = HookDispatcher::new();
    hooks.registrar("audit").register("user.login.after", |_args| Ok(()));
    hooks
        .registrar("audit")
        .register_filter("menu", |value, _args| Ok(value));
    hooks.register("user.login.after", |_args| Ok(()));

    assert_eq!(hooks.remove_owner("audit"), 2);
    assert_eq!(hooks.listener_count("user.login.after"), 1);
    assert!(!hooks.has_listeners("menu"));

    hooks.remove("user.login.after");
    assert!(hooks.hook_names().is_empty());
}

#[test]
fn listeners_may_dispatch_other_hooks() {
    let hooks = Arc::new(HookDispatcher::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let inner = Arc::clone(&seen);
    hooks.register("order.paid", move |args| {
        inner.lock().unwrap().push(args[0].clone());
        Ok(())
    });
    let nested = Arc::clone(&hooks);
    hooks.register("payment.notify", move |args| {
        let _ = nested.call("order.paid", args);
        Ok(())
    });

    hooks.call("payment.notify", &[json!("ord-1")]).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![json!("ord-1")]);
}
