use super::Opcode;
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct Resume<'a> {
    #[serde(rename = "op")]
    opcode: Opcode,

    #[serde(rename = "d")]
    data: ResumeData<'a>,
}

impl<'a> Resume<'a> {
    pub fn new(token: &'a str, session_id: &'a str, seq: u64) -> Self {
        Resume {
            opcode: Opcode::Resume,
            data: ResumeData {
                token,
                session_id,
                seq,
            },
        }
    }
}

#[derive(Serialize, Debug)]
struct ResumeData<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: u64,
}
