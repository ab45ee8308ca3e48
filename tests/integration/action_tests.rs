//! Actions: SMS, raw AT passthrough, ordering, timeouts and the cross-task
//! action channel.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use cellmodem::Error;
use cellmodem::app::commands::ModemCommand;
use cellmodem::app::events::ModemEvent;
use cellmodem::at::channels::{ACTION_DEPTH, ActionQueue, post};
use embassy_sync::channel::Channel;

use super::mock_hw::{Harness, Sent, test_config};

type Replies = Arc<Mutex<Vec<Result<String, Error>>>>;

fn send_at(command: &str, replies: &Replies) -> ModemCommand {
    let replies = replies.clone();
    ModemCommand::SendAt {
        command: command.into(),
        reply: Some(Box::new(move |r| {
            if let Ok(mut v) = replies.lock() {
                v.push(r);
            }
        })),
    }
}

fn sms(recipient: &str, message: &str) -> ModemCommand {
    ModemCommand::SendSms {
        recipient: recipient.into(),
        message: message.into(),
    }
}

/// `(sent, failed)` callback records.
fn watch_sms(h: &mut Harness) -> (Rc<RefCell<Vec<(String, String)>>>, Rc<RefCell<Vec<(String, String)>>>) {
    let sent = Rc::new(RefCell::new(Vec::new()));
    let failed = Rc::new(RefCell::new(Vec::new()));
    {
        let sent = sent.clone();
        h.svc
            .subscribers_mut()
            .on_sms_sent(move |msg, to| sent.borrow_mut().push((msg.to_owned(), to.to_owned())));
    }
    {
        let failed = failed.clone();
        h.svc
            .subscribers_mut()
            .on_sms_send_failed(move |err, to| failed.borrow_mut().push((err.to_owned(), to.to_owned())));
    }
    (sent, failed)
}

#[test]
fn sms_success_reports_sent_once() {
    let mut h = Harness::new(test_config());
    let (sent, failed) = watch_sms(&mut h);
    h.bring_up();
    h.modem.clear_sent();

    h.svc.handle_command(sms("+1555", "hi"));
    h.settle();

    assert_eq!(
        h.modem.sent(),
        vec![
            Sent::Line("AT+CMGF=1".into()),
            Sent::Line("AT+CSCS=\"GSM\"".into()),
            Sent::Line("AT+CMGS=\"+1555\"".into()),
            Sent::Payload("hi".into()),
        ]
    );
    assert_eq!(*sent.borrow(), vec![("hi".to_string(), "+1555".to_string())]);
    assert!(failed.borrow().is_empty());
}

#[test]
fn non_gsm_text_is_sent_as_ucs2() {
    let mut h = Harness::new(test_config());
    let (sent, failed) = watch_sms(&mut h);
    h.bring_up();
    h.modem.clear_sent();

    h.svc.handle_command(sms("+1555", "Grüße 😀"));
    h.settle();
    assert_eq!(
        h.modem.sent(),
        vec![
            Sent::Line("AT+CMGF=1".into()),
            Sent::Line("AT+CSCS=\"UCS2\"".into()),
            Sent::Line("AT+CSMP=17,167,0,8".into()),
            Sent::Line("AT+CMGS=\"002B0031003500350035\"".into()),
            Sent::Payload("0047007200FC00DF00650020D83DDE00".into()),
        ]
    );
    assert_eq!(*sent.borrow(), vec![("Grüße 😀".to_string(), "+1555".to_string())]);

    // Plain text afterwards switches the coding scheme back.
    h.modem.clear_sent();
    h.svc.handle_command(sms("+1555", "hi"));
    h.settle();
    assert_eq!(
        h.modem.sent(),
        vec![
            Sent::Line("AT+CMGF=1".into()),
            Sent::Line("AT+CSCS=\"GSM\"".into()),
            Sent::Line("AT+CSMP=17,167,0,0".into()),
            Sent::Line("AT+CMGS=\"+1555\"".into()),
            Sent::Payload("hi".into()),
        ]
    );
    assert!(failed.borrow().is_empty());
}

#[test]
fn sms_rejected_by_network_reports_failure_once() {
    let mut h = Harness::new(test_config());
    let (sent, failed) = watch_sms(&mut h);
    h.bring_up();
    h.modem
        .with(|m| m.cmgs_reply = Some("\r\n+CMS ERROR: 304\r\n".into()));

    h.svc.handle_command(sms("+1555", "hi"));
    h.settle();

    assert!(sent.borrow().is_empty());
    assert_eq!(
        *failed.borrow(),
        vec![("+CMS ERROR: 304".to_string(), "+1555".to_string())]
    );
}

#[test]
fn sms_setup_failure_skips_submit() {
    let mut h = Harness::new(test_config());
    let (sent, failed) = watch_sms(&mut h);
    h.bring_up();
    h.modem.with(|m| {
        m.overrides
            .insert("AT+CSCS=\"GSM\"".into(), "\r\n+CME ERROR: operation not allowed\r\n".into());
    });
    h.modem.clear_sent();

    h.svc.handle_command(sms("+1555", "hi"));
    h.settle();

    assert!(h.modem.lines().iter().all(|l| !l.starts_with("AT+CMGS")));
    assert!(sent.borrow().is_empty());
    assert_eq!(failed.borrow().len(), 1);
    assert_eq!(failed.borrow()[0].0, "+CME ERROR: operation not allowed");
}

#[test]
fn sms_before_registration_is_sent_once_registered() {
    let mut h = Harness::new(test_config());
    let (sent, _failed) = watch_sms(&mut h);
    h.svc.start();
    h.svc.handle_command(sms("+1555", "early"));
    assert_eq!(h.svc.deferred_actions(), 1);

    h.run_until(cellmodem::fsm::ModemState::Registered);
    h.settle();

    assert_eq!(h.svc.deferred_actions(), 0);
    assert_eq!(*sent.borrow(), vec![("early".to_string(), "+1555".to_string())]);
}

#[test]
fn send_at_returns_raw_response() {
    let mut h = Harness::new(test_config());
    h.bring_up();
    let replies = Replies::default();

    h.svc.handle_command(send_at("AT+CSQ", &replies));
    h.svc.handle_command(send_at("AT+BOGUS", &replies));
    h.settle();

    let replies = replies.lock().map(|v| v.clone()).unwrap_or_default();
    assert_eq!(
        replies,
        vec![Ok("+CSQ: 20,99\nOK".to_string()), Ok("ERROR".to_string())]
    );
}

#[test]
fn notification_inside_a_raw_answer_is_still_handled() {
    let mut h = Harness::new(test_config());
    h.bring_up();
    h.take_events();
    h.modem.with(|m| {
        m.inbox.push((5, "+15550005".into(), "new firmware?".into()));
        m.overrides.insert(
            "AT+GMR".into(),
            "\r\n+CMTI: \"SM\",5\r\n\r\nLE11B01\r\n\r\nOK\r\n".into(),
        );
    });
    let replies = Replies::default();

    h.svc.handle_command(send_at("AT+GMR", &replies));
    h.settle();

    let replies = replies.lock().map(|v| v.clone()).unwrap_or_default();
    assert_eq!(replies, vec![Ok("LE11B01\nOK".to_string())]);
    assert!(h.take_events().contains(&ModemEvent::SmsReceived {
        message: "new firmware?".into(),
        sender: "+15550005".into(),
    }));
}

#[test]
fn commands_go_out_in_submission_order_one_at_a_time() {
    let mut h = Harness::new(test_config());
    h.bring_up();
    h.modem.clear_sent();
    h.modem.with(|m| m.silent = true);
    let replies = Replies::default();

    for cmd in ["AT+ONE", "AT+TWO", "AT+THREE"] {
        h.svc.handle_command(send_at(cmd, &replies));
    }
    h.tick();
    h.tick();
    assert_eq!(h.modem.lines(), vec!["AT+ONE"]);

    h.modem.with(|m| m.silent = false);
    h.modem.urc("OK");
    h.settle();
    assert_eq!(h.modem.lines(), vec!["AT+ONE", "AT+TWO", "AT+THREE"]);
    assert_eq!(replies.lock().map(|v| v.len()).unwrap_or_default(), 3);
}

#[test]
fn unanswered_command_times_out_and_does_not_block_the_next() {
    let mut h = Harness::new(test_config());
    h.bring_up();
    h.modem.with(|m| m.silent = true);
    let replies = Replies::default();

    h.svc.handle_command(send_at("AT+SLOW", &replies));
    h.svc.handle_command(send_at("AT", &replies));
    h.tick();

    h.step(4_999);
    assert!(replies.lock().map(|v| v.is_empty()).unwrap_or_default());

    h.modem.with(|m| m.silent = false);
    h.step(1);
    h.settle();

    let replies = replies.lock().map(|v| v.clone()).unwrap_or_default();
    assert_eq!(replies, vec![Err(Error::Timeout), Ok("OK".to_string())]);
    assert_eq!(h.modem.count("AT+SLOW"), 1, "passthrough is never re-sent");
}

#[test]
fn empty_recipient_fails_without_touching_the_modem() {
    let mut h = Harness::new(test_config());
    let (_sent, failed) = watch_sms(&mut h);
    h.bring_up();
    h.modem.clear_sent();

    h.svc.handle_command(sms("", "hi"));
    h.tick();

    assert!(h.modem.sent().is_empty());
    assert_eq!(failed.borrow().len(), 1);
}

#[test]
fn posted_actions_are_drained_in_order() {
    let queue: ActionQueue = Channel::new();
    let mut h = Harness::new(test_config());
    h.bring_up();
    h.modem.clear_sent();
    let replies = Replies::default();

    assert!(post(&queue, send_at("AT+FIRST", &replies)).is_ok());
    assert!(post(&queue, send_at("AT+SECOND", &replies)).is_ok());
    h.svc.drain_actions(&queue);
    h.settle();

    assert_eq!(h.modem.lines(), vec!["AT+FIRST", "AT+SECOND"]);
}

#[test]
fn full_action_channel_hands_the_action_back() {
    let queue: ActionQueue = Channel::new();
    for _ in 0..ACTION_DEPTH {
        assert!(post(&queue, ModemCommand::DebugOn).is_ok());
    }
    assert!(matches!(post(&queue, ModemCommand::DebugOff), Err(ModemCommand::DebugOff)));
}

#[test]
fn debug_toggle_only_changes_logging() {
    let mut h = Harness::new(test_config());
    h.bring_up();
    h.modem.clear_sent();

    h.svc.handle_command(ModemCommand::DebugOn);
    assert!(h.svc.is_debug());
    h.svc.handle_command(ModemCommand::DebugOff);
    assert!(!h.svc.is_debug());
    h.settle();
    assert!(h.modem.sent().is_empty());
}

#[test]
fn every_event_reaches_the_sink_and_subscribers() {
    let mut h = Harness::new(test_config());
    let (sent, _failed) = watch_sms(&mut h);
    h.bring_up();
    h.take_events();

    h.svc.handle_command(sms("+1555", "hi"));
    h.settle();

    let events = h.take_events();
    let sink_sent = events
        .iter()
        .filter(|e| matches!(e, ModemEvent::SmsSent { .. }))
        .count();
    assert_eq!(sink_sent, 1);
    assert_eq!(sent.borrow().len(), 1);
}
