use crate::availability::SlotPolicy;

pub trait Configuration: Clone + Send + Sync + 'static {
    fn password(&self) -> String;
    fn port(&self) -> u16;
    fn database_url(&self) -> Option<String>;
    fn slot_policy(&self) -> SlotPolicy;
}
