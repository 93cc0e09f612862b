/// Width of the command code that prefixes every request.
pub const COMMAND_LEN: usize = 3;

/// Shortest accepted request: a full command code and at least one identifier character.
pub const MIN_REQUEST_LEN: usize = COMMAND_LEN + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `csr`: classify the identifier.
    CheckSimple,
    Unknown,
}

impl Command {
    pub fn from_code(code: &str) -> Command {
        match code {
            "csr" => Command::CheckSimple,
            _ => Command::Unknown,
        }
    }

    /// Metrics label; every unrecognized code shares one value.
    pub fn label(&self) -> &'static str {
        match self {
            Command::CheckSimple => "csr",
            Command::Unknown => "unknown",
        }
    }
}

/// A raw inbound message split into its command code and identifier.
/// Borrows from the message body; it lives only while that message is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    raw: &'a str,
    code: &'a str,
    identifier: &'a str,
}

impl<'a> Request<'a> {
    /// Returns `None` for bodies shorter than [`MIN_REQUEST_LEN`] characters.
    /// Splitting is done on characters, so multi-byte input never panics.
    pub fn parse(raw: &'a str) -> Option<Request<'a>> {
        let (split, _) = raw.char_indices().nth(COMMAND_LEN)?;
        let (code, identifier) = raw.split_at(split);

        Some(Request {
            raw,
            code,
            identifier,
        })
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    pub fn code(&self) -> &'a str {
        self.code
    }

    pub fn identifier(&self) -> &'a str {
        self.identifier
    }

    pub fn command(&self) -> Command {
        Command::from_code(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_command_and_identifier() {
        let request = Request::parse("csr5551402").unwrap();

        assert_eq!(request.raw(), "csr5551402");
        assert_eq!(request.code(), "csr");
        assert_eq!(request.identifier(), "5551402");
        assert_eq!(request.command(), Command::CheckSimple);
    }

    #[test]
    fn test_parse_rejects_short_messages() {
        assert_eq!(Request::parse(""), None);
        assert_eq!(Request::parse("c"), None);
        assert_eq!(Request::parse("csr"), None);
        assert!(Request::parse("csr1").is_some());
    }

    #[test]
    fn test_unknown_command() {
        let request = Request::parse("xyz5551234").unwrap();

        assert_eq!(request.code(), "xyz");
        assert_eq!(request.command(), Command::Unknown);
    }

    #[test]
    fn test_label_is_bounded() {
        assert_eq!(Command::from_code("csr").label(), "csr");
        for code in ["xyz", "abc", "čšř", "CSR"] {
            assert_eq!(Command::from_code(code).label(), "unknown");
        }
    }

    #[test]
    fn test_parse_multibyte_input() {
        let request = Request::parse("čšř123").unwrap();

        assert_eq!(request.code(), "čšř");
        assert_eq!(request.identifier(), "123");
        assert_eq!(request.command(), Command::Unknown);

        assert_eq!(Request::parse("čšř"), None);
    }
}
