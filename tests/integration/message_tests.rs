//! Incoming SMS (stored and direct delivery), USSD and unsolicited line
//! routing to subscribers.

use std::cell::RefCell;
use std::rc::Rc;

use cellmodem::app::commands::ModemCommand;
use cellmodem::app::events::ModemEvent;
use cellmodem::config::ModemConfig;

use super::mock_hw::{Harness, test_config};

fn received(events: &[ModemEvent]) -> Vec<(String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            ModemEvent::SmsReceived { message, sender } => Some((message.clone(), sender.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn stored_sms_is_read_delivered_and_deleted() {
    let mut h = Harness::new(test_config());
    h.bring_up();
    h.take_events();
    h.modem
        .with(|m| m.inbox.push((3, "+15550002".into(), "see you at 5".into())));
    h.modem.clear_sent();

    h.modem.urc("+CMTI: \"SM\",3");
    h.settle();

    assert_eq!(
        h.modem.lines(),
        vec![
            "AT+CMGF=1",
            "AT+CSDH=1",
            "AT+CSCS=\"UCS2\"",
            "AT+CMGL=\"REC UNREAD\"",
            "AT+CMGD=3"
        ]
    );
    assert_eq!(
        received(&h.take_events()),
        vec![("see you at 5".to_string(), "+15550002".to_string())]
    );
    h.modem.with(|m| assert!(m.inbox.is_empty()));
}

#[test]
fn messages_waiting_at_boot_are_read_once_registered() {
    let mut h = Harness::new(test_config());
    h.modem.with(|m| {
        m.inbox.push((1, "+1".into(), "first".into()));
        m.inbox.push((2, "+2".into(), "second".into()));
    });
    h.bring_up();

    assert_eq!(
        received(&h.take_events()),
        vec![
            ("first".to_string(), "+1".to_string()),
            ("second".to_string(), "+2".to_string()),
        ]
    );
    assert_eq!(h.modem.count("AT+CMGD=1"), 1);
    assert_eq!(h.modem.count("AT+CMGD=2"), 1);
}

#[test]
fn keeping_read_messages_skips_delete() {
    let config = ModemConfig {
        delete_read_sms: false,
        ..test_config()
    };
    let mut h = Harness::new(config);
    h.modem.with(|m| m.inbox.push((4, "+1".into(), "keep me".into())));
    h.bring_up();

    assert_eq!(received(&h.take_events()).len(), 1);
    assert!(h.modem.lines().iter().all(|l| !l.starts_with("AT+CMGD")));
}

#[test]
fn inbox_bodies_that_read_like_result_codes_arrive_intact() {
    let mut h = Harness::new(test_config());
    let bodies = ["OK", "+CMS ERROR: 500", "> see below", "", "ERROR"];
    h.modem.with(|m| {
        m.ucs2_supported = false;
        for (i, body) in bodies.iter().enumerate() {
            m.inbox.push((6 + i as u16, format!("+1555000{i}"), (*body).into()));
        }
    });
    h.bring_up();

    let expected: Vec<(String, String)> = bodies
        .iter()
        .enumerate()
        .map(|(i, body)| ((*body).to_string(), format!("+1555000{i}")))
        .collect();
    assert_eq!(received(&h.take_events()), expected);
    h.modem.with(|m| assert!(m.inbox.is_empty()));
}

#[test]
fn non_ascii_inbox_message_is_read_as_ucs2() {
    let mut h = Harness::new(test_config());
    h.modem
        .with(|m| m.inbox.push((11, "+4930123".into(), "Grüße 😀\nbis bald".into())));
    h.bring_up();

    assert_eq!(
        received(&h.take_events()),
        vec![("Grüße 😀\nbis bald".to_string(), "+4930123".to_string())]
    );
    assert_eq!(h.modem.count("AT+CSCS=\"UCS2\""), 1);
}

#[test]
fn delivered_sms_body_is_not_taken_as_a_command_result() {
    let mut h = Harness::new(test_config());
    h.bring_up();
    h.take_events();
    h.modem.with(|m| m.silent = true);

    h.svc.handle_command(ModemCommand::SendAt {
        command: "AT+SLOW".into(),
        reply: None,
    });
    h.tick();
    h.modem.urc("+CMT: \"+15550003\",\"\",\"24/10/18,09:15:00+08\"");
    h.modem.urc("OK");
    h.tick();

    assert_eq!(
        received(&h.take_events()),
        vec![("OK".to_string(), "+15550003".to_string())]
    );
    assert_eq!(h.svc.pending_commands(), 1, "AT+SLOW still awaits its answer");
}

#[test]
fn directly_delivered_sms_spans_two_lines() {
    let mut h = Harness::new(test_config());
    h.bring_up();
    h.take_events();

    h.modem.urc("+CMT: \"+15550003\",\"\",\"24/10/18,09:15:00+08\"");
    h.modem.urc("running late");
    h.tick();

    assert_eq!(
        received(&h.take_events()),
        vec![("running late".to_string(), "+15550003".to_string())]
    );
}

#[test]
fn ussd_request_is_hex_encoded_and_reply_decoded() {
    let mut h = Harness::new(test_config());
    let replies = Rc::new(RefCell::new(Vec::new()));
    {
        let replies = replies.clone();
        h.svc
            .subscribers_mut()
            .on_ussd_received(move |text| replies.borrow_mut().push(text.to_owned()));
    }
    h.bring_up();
    h.modem.clear_sent();

    h.svc.handle_command(ModemCommand::SendUssd {
        code: "*100#".into(),
    });
    h.settle();
    assert_eq!(
        h.modem.lines(),
        vec!["AT+CSCS=\"GSM\"", "AT+CUSD=1,\"2A31303023\",15"]
    );

    h.modem.urc("+CUSD: 0,\"42616C616E63652031302E3030\",15");
    h.tick();
    assert_eq!(*replies.borrow(), vec!["Balance 10.00".to_string()]);
}

#[test]
fn plain_ussd_when_hex_is_disabled() {
    let config = ModemConfig {
        ussd_hex: false,
        ..test_config()
    };
    let mut h = Harness::new(config);
    h.bring_up();
    h.take_events();
    h.modem.clear_sent();

    h.svc.handle_command(ModemCommand::SendUssd {
        code: "*100#".into(),
    });
    h.settle();
    assert!(h.modem.lines().contains(&"AT+CUSD=1,\"*100#\",15".to_string()));

    h.modem.urc("+CUSD: 0,\"Balance, 5 EUR\",15");
    h.tick();
    assert!(h.take_events().contains(&ModemEvent::UssdReceived {
        text: "Balance, 5 EUR".into()
    }));
}

#[test]
fn subscribers_run_in_registration_order_exactly_once() {
    let mut h = Harness::new(test_config());
    let log = Rc::new(RefCell::new(Vec::new()));
    for n in 0..3 {
        let log = log.clone();
        h.svc
            .subscribers_mut()
            .on_sms_received(move |msg, _| log.borrow_mut().push(format!("{n}:{msg}")));
    }
    h.bring_up();

    h.modem.urc("+CMT: \"+1\",\"\",\"24/10/18,09:15:00+08\"");
    h.modem.urc("ping");
    h.tick();

    assert_eq!(*log.borrow(), vec!["0:ping", "1:ping", "2:ping"]);
}

#[test]
fn unrecognised_and_malformed_lines_reach_nobody() {
    let mut h = Harness::new(test_config());
    h.bring_up();
    h.take_events();

    h.modem.urc("+QIND: \"FOTA\",\"START\"");
    h.modem.urc("+CSQ: garbage");
    h.modem.urc("SMS Ready");
    h.tick();

    assert!(h.take_events().is_empty());
    assert_eq!(h.svc.dropped_lines(), 1);
}
