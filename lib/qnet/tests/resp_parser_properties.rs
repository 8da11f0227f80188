use proptest::prelude::*;
use qnet::{ParseOutcome, RespParser};

fn encode_multibulk(args: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn ascii_arg() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".to_vec()), 0..12)
}

proptest! {
    /// Feeding a well-formed multibulk command in one shot or split at any
    /// byte offset produces the same argv.
    #[test]
    fn split_feed_equivalence(
        args in prop::collection::vec(ascii_arg(), 1..6),
        split_at in 0usize..200,
    ) {
        let encoded = encode_multibulk(&args);
        let split_at = split_at.min(encoded.len());

        let mut whole = RespParser::new();
        let (_, outcome_whole) = whole.parse(&encoded);
        prop_assert_eq!(outcome_whole, ParseOutcome::Ready);
        let argv_whole = whole.take_argv();

        let mut split = RespParser::new();
        let mut total_consumed = 0usize;
        let (c1, outcome1) = split.parse(&encoded[..split_at]);
        total_consumed += c1;
        let argv_split = if outcome1 == ParseOutcome::Ready {
            split.take_argv()
        } else {
            prop_assert_eq!(outcome1, ParseOutcome::NeedMore);
            let (c2, outcome2) = split.parse(&encoded[total_consumed..]);
            prop_assert_eq!(outcome2, ParseOutcome::Ready);
            split.take_argv()
        };

        prop_assert_eq!(argv_whole, argv_split);
    }

    /// Any run of space/tab-separated plain-ASCII tokens followed by CRLF
    /// tokenizes into exactly those tokens as an inline command (no quotes
    /// involved, so no ambiguity about whitespace runs collapsing).
    #[test]
    fn inline_tokenizes_whitespace_separated_words(
        words in prop::collection::vec(
            prop::collection::vec(prop::sample::select(b"abcdefghijXYZ019".to_vec()), 1..8)
                .prop_map(|v| String::from_utf8(v).unwrap()),
            1..6,
        )
    ) {
        let line = words.join(" ");
        let mut input = line.clone().into_bytes();
        input.extend_from_slice(b"\r\n");

        let mut p = RespParser::new();
        let (consumed, outcome) = p.parse(&input);
        prop_assert_eq!(outcome, ParseOutcome::Ready);
        prop_assert_eq!(consumed, input.len());
        let argv = p.take_argv();
        let expected: Vec<Vec<u8>> = words.iter().map(|w| w.clone().into_bytes()).collect();
        prop_assert_eq!(argv, expected);
    }

    /// Malformed multibulk length headers are rejected with zero bytes
    /// consumed, regardless of what follows.
    #[test]
    fn malformed_multibulk_length_never_consumes(garbage in "[^0-9\r\n\\*][a-zA-Z]{0,8}") {
        let mut input = format!("*{}", garbage).into_bytes();
        input.extend_from_slice(b"\r\n");
        let mut p = RespParser::new();
        let (consumed, outcome) = p.parse(&input);
        match outcome {
            ParseOutcome::Error(_) => prop_assert_eq!(consumed, 0),
            _ => {}
        }
    }
}
