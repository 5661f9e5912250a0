//! Interactive command lines

use rvoip_bridge_client::Credentials;

pub const HELP: &str = "\
Commands:
  connect                                   reconnect to the gateway now
  register <server> <port> <login> <password> <number>
  register                                  register with saved credentials
  unregister
  call <number>                             place a call
  answer                                    answer the ringing call
  hangup                                    hang up
  dtmf <digit>                              send 0-9 * # A-D during a call
  msg <number> <text...>                    send a SIP MESSAGE
  status                                    ask the gateway for its state
  ping
  show                                      print the current state
  log [count]                               print recent log entries
  help
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Connect,
    Register(Credentials),
    RegisterSaved,
    Unregister,
    Call(String),
    Answer,
    Hangup,
    Dtmf(char),
    Message { to: String, text: String },
    Status,
    Ping,
    Show,
    Log(usize),
    Help,
    Quit,
}

/// Parse one line; `Ok(None)` for a blank line
pub fn parse(line: &str) -> Result<Option<Input>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let input = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("connect", []) => Input::Connect,
        ("register", []) => Input::RegisterSaved,
        ("register", [server, port, login, password, number]) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid port: {}", port))?;
            Input::Register(Credentials::new(*server, port, *login, *password, *number))
        }
        ("unregister", []) => Input::Unregister,
        ("call", [number]) => Input::Call(number.to_string()),
        ("answer", []) => Input::Answer,
        ("hangup", []) => Input::Hangup,
        ("dtmf", [digit]) => {
            let mut chars = digit.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Input::Dtmf(c.to_ascii_uppercase()),
                _ => return Err(format!("dtmf takes a single digit, got {:?}", digit)),
            }
        }
        ("msg", [to, text @ ..]) if !text.is_empty() => Input::Message {
            to: to.to_string(),
            text: text.join(" "),
        },
        ("status", []) => Input::Status,
        ("ping", []) => Input::Ping,
        ("show", []) => Input::Show,
        ("log", []) => Input::Log(20),
        ("log", [count]) => Input::Log(count.parse().map_err(|_| format!("invalid count: {}", count))?),
        ("help" | "?", _) => Input::Help,
        ("quit" | "exit", []) => Input::Quit,
        (verb, _) => return Err(format!("unknown or malformed command '{}', try 'help'", verb)),
    };
    Ok(Some(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line() {
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn test_register_forms() {
        assert_eq!(parse("register"), Ok(Some(Input::RegisterSaved)));
        assert_eq!(
            parse("register pbx.example.com 5060 alice secret 1001"),
            Ok(Some(Input::Register(Credentials::new(
                "pbx.example.com",
                5060,
                "alice",
                "secret",
                "1001"
            ))))
        );
        assert!(parse("register pbx.example.com port alice secret 1001").is_err());
        assert!(parse("register pbx.example.com 5060").is_err());
    }

    #[test]
    fn test_call_controls() {
        assert_eq!(parse("call 1002"), Ok(Some(Input::Call("1002".to_string()))));
        assert_eq!(parse("ANSWER"), Ok(Some(Input::Answer)));
        assert_eq!(parse("dtmf #"), Ok(Some(Input::Dtmf('#'))));
        assert_eq!(parse("dtmf a"), Ok(Some(Input::Dtmf('A'))));
        assert!(parse("dtmf 12").is_err());
    }

    #[test]
    fn test_message_keeps_spaces_between_words() {
        assert_eq!(
            parse("msg 1002 see you   at noon"),
            Ok(Some(Input::Message {
                to: "1002".to_string(),
                text: "see you at noon".to_string(),
            }))
        );
        assert!(parse("msg 1002").is_err());
    }

    #[test]
    fn test_log_count() {
        assert_eq!(parse("log"), Ok(Some(Input::Log(20))));
        assert_eq!(parse("log 5"), Ok(Some(Input::Log(5))));
        assert!(parse("log many").is_err());
    }

    #[test]
    fn test_unknown_command() {
        assert!(parse("transfer 1003").unwrap_err().contains("transfer"));
    }
}
