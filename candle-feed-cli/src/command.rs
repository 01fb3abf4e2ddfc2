use candle_feed::model::{Selection, Symbol, Timeframe};

pub const USAGE: &str = "commands: tf <1m|5m|15m|1h|4h|1d>, symbol <SYMBOL>, retry, quit";

/// Interactive command read from stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Select(Selection),
    Retry,
    Quit,
}

/// Parse one line of input relative to the `current` selection.
///
/// `tf` keeps the symbol and `symbol` keeps the timeframe. Unknown input yields `None`.
pub fn parse_input(line: &str, current: &Selection) -> Option<Input> {
    let mut words = line.split_whitespace();
    let command = words.next()?.to_ascii_lowercase();
    let argument = words.next();

    if words.next().is_some() {
        return None;
    }

    match (command.as_str(), argument) {
        ("tf" | "timeframe", Some(timeframe)) => timeframe
            .parse::<Timeframe>()
            .ok()
            .map(|timeframe| Input::Select(Selection::new(current.symbol.clone(), timeframe))),
        ("symbol" | "s", Some(symbol)) => Some(Input::Select(Selection::new(
            Symbol::new(symbol),
            current.timeframe,
        ))),
        ("retry" | "r", None) => Some(Input::Retry),
        ("quit" | "exit" | "q", None) => Some(Input::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        struct TestCase {
            input: &'static str,
            expected: Option<Input>,
        }

        let current = Selection::new(Symbol::new("btc"), Timeframe::M5);

        let tests = vec![
            TestCase {
                // TC0: timeframe switch keeps the symbol
                input: "tf 1h",
                expected: Some(Input::Select(Selection::new(Symbol::new("btc"), Timeframe::H1))),
            },
            TestCase {
                // TC1: symbol switch keeps the timeframe
                input: "  SYMBOL eth/usdt ",
                expected: Some(Input::Select(Selection::new(
                    Symbol::new("ETH-USDT"),
                    Timeframe::M5,
                ))),
            },
            TestCase {
                // TC2: retry
                input: "retry",
                expected: Some(Input::Retry),
            },
            TestCase {
                // TC3: quit alias
                input: "q",
                expected: Some(Input::Quit),
            },
            TestCase {
                // TC4: unknown timeframe
                input: "tf 2m",
                expected: None,
            },
            TestCase {
                // TC5: missing argument
                input: "symbol",
                expected: None,
            },
            TestCase {
                // TC6: trailing garbage
                input: "retry now",
                expected: None,
            },
            TestCase {
                // TC7: blank line
                input: "   ",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_input(test.input, &current);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
