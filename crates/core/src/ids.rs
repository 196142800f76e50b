use rand::Rng;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
pub const RANDOM_ID_LEN: usize = 7;

pub trait IdGenerator: Send {
    fn next_id(&mut self) -> String;
}

#[must_use]
pub fn generate_id() -> String {
    random_base36(RANDOM_ID_LEN)
}

fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(BASE36_DIGITS[rng.gen_range(0..BASE36_DIGITS.len())]))
        .collect()
}

fn encode_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        // value % 36 always fits in the digit table
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

/// Random ids prefixed with a session-local counter, so two ids handed out by the same
/// generator never collide even when the random suffixes do.
#[derive(Debug, Default)]
pub struct RandomIds {
    issued: u64,
}

impl RandomIds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for RandomIds {
    fn next_id(&mut self) -> String {
        let prefix = encode_base36(self.issued);
        self.issued += 1;
        format!("{prefix}{}", random_base36(RANDOM_ID_LEN))
    }
}

#[derive(Debug, Clone)]
pub struct SequentialIds {
    prefix: String,
    next: u64,
}

impl SequentialIds {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&mut self) -> String {
        let id = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        id
    }
}
