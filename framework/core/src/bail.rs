/// Return this error from a participant driver to indicate that the participant is bailing.
///
/// This should be used when a simulated participant hits an error that is not fatal to the run.
/// For example, if its exercise repository cannot be cloned after retrying then that participant
/// may bail but the run should continue with the other participants.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ParticipantBailError {
    msg: String,
}

impl Default for ParticipantBailError {
    fn default() -> Self {
        Self {
            msg: "Participant is bailing".to_string(),
        }
    }
}
