// Storage provider - lets the SQLite seen store back the poller
use medalert_store::{SeenSet, SeenStore};

use crate::poller::SeenRepository;
use crate::Result;

impl SeenRepository for SeenStore {
    fn load(&self) -> Result<SeenSet> {
        Ok(SeenStore::load(self)?)
    }

    fn save(&self, set: &SeenSet) -> Result<()> {
        Ok(SeenStore::save(self, set)?)
    }
}
