//! Property-based tests for the ADC codec.
//!
//! These tests use proptest to verify:
//! - Escape/unescape bijection for arbitrary payloads
//! - Parse/serialize roundtrip for arbitrary commands
//! - The parser never panics on arbitrary input

#![cfg(test)]

use proptest::prelude::*;

use super::command::{escape, fourcc, unescape, Command, CommandType, FeatureKind, Sid};

fn arb_command_type() -> impl Strategy<Value = CommandType> {
    prop_oneof![
        Just(CommandType::Broadcast),
        Just(CommandType::Client),
        Just(CommandType::Direct),
        Just(CommandType::Echo),
        Just(CommandType::Feature),
        Just(CommandType::Hub),
        Just(CommandType::Info),
        Just(CommandType::Udp),
    ]
}

fn arb_code() -> impl Strategy<Value = u32> {
    proptest::array::uniform3(b'A'..=b'Z').prop_map(|l| fourcc(&l))
}

fn arb_sid() -> impl Strategy<Value = Sid> {
    "[A-Z2-7]{4}".prop_map(|s| Sid::parse(&s).unwrap())
}

fn arb_param() -> impl Strategy<Value = String> {
    // Arbitrary printable payloads plus the characters the escape
    // alphabet has to handle. Parameters must be non-empty to survive
    // a roundtrip (an empty trailing parameter is dropped by parse).
    proptest::collection::vec(
        prop_oneof![
            proptest::char::range(' ', '~'),
            Just('\n'),
            Just('\\'),
            proptest::char::range('\u{a1}', '\u{ff}'),
        ],
        1..40,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

fn arb_features() -> impl Strategy<Value = Vec<(String, FeatureKind)>> {
    proptest::collection::vec(
        ("[A-Z0-9]{4}", any::<bool>()).prop_map(|(name, required)| {
            let kind = if required {
                FeatureKind::Required
            } else {
                FeatureKind::Excluded
            };
            (name, kind)
        }),
        0..4,
    )
}

prop_compose! {
    // Legacy lines carry no addressing and always parse as type `C`.
    fn arb_legacy_command()(
        code in arb_code(),
        params in proptest::collection::vec(arb_param(), 0..8),
    ) -> Command {
        let mut cmd = Command::new(code, CommandType::Client);
        for p in params {
            cmd.add_positional(p);
        }
        cmd
    }
}

prop_compose! {
    fn arb_command()(
        code in arb_code(),
        ctype in arb_command_type(),
        from in arb_sid(),
        to in arb_sid(),
        features in arb_features(),
        params in proptest::collection::vec(arb_param(), 0..8),
    ) -> Command {
        let mut cmd = Command::new(code, ctype);
        cmd.set_from(from);
        cmd.set_to(to);
        for (name, kind) in &features {
            cmd.add_feature(name, *kind);
        }
        for p in params {
            cmd.add_positional(p);
        }
        cmd
    }
}

proptest! {
    #[test]
    fn escape_unescape_bijection(payload in "\\PC*") {
        let escaped = escape(&payload, false);
        prop_assert!(!escaped.contains(' '));
        prop_assert!(!escaped.contains('\n'));
        prop_assert_eq!(unescape(&escaped, false).unwrap(), payload);
    }

    #[test]
    fn old_escape_unescape_bijection(payload in "\\PC*") {
        let escaped = escape(&payload, true);
        prop_assert_eq!(unescape(&escaped, true).unwrap(), payload);
    }

    #[test]
    fn serialize_parse_roundtrip(cmd in arb_command()) {
        let line = cmd.to_line();
        let parsed = Command::parse(&line, false).unwrap();

        prop_assert_eq!(parsed.code(), cmd.code());
        prop_assert_eq!(parsed.command_type(), cmd.command_type());
        prop_assert_eq!(parsed.params(), cmd.params());
        match cmd.command_type() {
            CommandType::Broadcast | CommandType::Feature => {
                prop_assert_eq!(parsed.from(), cmd.from());
            }
            CommandType::Direct | CommandType::Echo => {
                prop_assert_eq!(parsed.from(), cmd.from());
                prop_assert_eq!(parsed.to(), cmd.to());
            }
            _ => {}
        }
        if cmd.command_type() == CommandType::Feature {
            prop_assert_eq!(parsed.features(), cmd.features());
        }
    }

    #[test]
    fn legacy_serialize_parse_roundtrip(cmd in arb_legacy_command()) {
        let line = cmd.to_line_from(Sid::default(), true);
        let parsed = Command::parse(&line, true).unwrap();

        prop_assert_eq!(parsed.code(), cmd.code());
        prop_assert_eq!(parsed.command_type(), CommandType::Client);
        prop_assert_eq!(parsed.params(), cmd.params());
    }

    #[test]
    fn parse_never_panics(line in "\\PC{0,120}", nmdc in any::<bool>()) {
        let _ = Command::parse(&line, nmdc);
    }

    #[test]
    fn parsed_params_never_contain_separators(cmd in arb_command()) {
        let line = cmd.to_line();
        for token in line.trim_end().split(' ').skip(1) {
            prop_assert!(!token.contains('\n'));
        }
    }
}
