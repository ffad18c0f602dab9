//! Window title tracking from OSC escape sequences

/// Longest partial sequence carried between chunks
const MAX_PENDING: usize = 4096;

/// Extracts `OSC 0` / `OSC 2` titles from a stream of output chunks
///
/// A sequence split across chunk boundaries is carried over and completed by
/// the next chunk.
#[derive(Debug, Default)]
pub struct TitleScanner {
    pending: Vec<u8>,
}

impl TitleScanner {
    /// Create an empty scanner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the last complete title it contained
    pub fn feed(&mut self, chunk: &[u8]) -> Option<String> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(chunk);

        let mut title = None;
        let mut i = 0;
        while i + 1 < data.len() {
            if data[i] != 0x1b || data[i + 1] != b']' {
                i += 1;
                continue;
            }
            match find_terminator(&data[i + 2..]) {
                Some((body_len, term_len)) => {
                    let body = &data[i + 2..i + 2 + body_len];
                    if let Some(t) = parse_title(body) {
                        title = Some(t);
                    }
                    i += 2 + body_len + term_len;
                }
                None => {
                    if data.len() - i <= MAX_PENDING {
                        self.pending = data[i..].to_vec();
                    }
                    return title;
                }
            }
        }
        // A lone trailing ESC may start the next sequence
        if data.last() == Some(&0x1b) {
            self.pending.push(0x1b);
        }
        title
    }
}

/// Length of the OSC body and of its terminator (BEL or ESC \)
fn find_terminator(rest: &[u8]) -> Option<(usize, usize)> {
    let mut j = 0;
    while j < rest.len() {
        match rest[j] {
            0x07 => return Some((j, 1)),
            0x1b if rest.get(j + 1) == Some(&b'\\') => return Some((j, 2)),
            _ => j += 1,
        }
    }
    None
}

fn parse_title(body: &[u8]) -> Option<String> {
    let sep = body.iter().position(|b| *b == b';')?;
    match &body[..sep] {
        b"0" | b"2" => Some(String::from_utf8_lossy(&body[sep + 1..]).into_owned()),
        _ => None,
    }
}
