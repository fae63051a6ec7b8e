use crate::core::{error::RunnerError, storage::HeadersTree};
use ride_common::block::{BlockHeaderWithVrf, Height};
use std::{collections::BTreeMap, sync::Mutex};

// Last-N header window over the dense on-disk header tree.
// The window is what steady-state evaluation reads; anything older falls
// through to disk.
pub struct HeadersStorage {
    window: Mutex<BTreeMap<Height, BlockHeaderWithVrf>>,
    disk: HeadersTree,
    window_size: usize,
}

impl HeadersStorage {
    pub fn new(disk: HeadersTree, window_size: usize) -> Result<Self, RunnerError> {
        let mut window = BTreeMap::new();
        if let Some(last) = disk.get_last_height()? {
            let from = last.saturating_sub(window_size as Height);
            for (height, header) in disk.get_range(from, last)? {
                window.insert(height, header);
            }
        }
        Ok(HeadersStorage {
            window: Mutex::new(window),
            disk,
            window_size,
        })
    }

    pub fn get(&self, height: Height) -> Result<Option<BlockHeaderWithVrf>, RunnerError> {
        {
            let window = self.window.lock().expect("headers lock poisoned");
            if let Some(header) = window.get(&height) {
                return Ok(Some(header.clone()));
            }
        }
        self.disk.get(height)
    }

    pub fn set(&self, height: Height, header: &BlockHeaderWithVrf) -> Result<(), RunnerError> {
        self.disk.set(height, header)?;
        let mut window = self.window.lock().expect("headers lock poisoned");
        window.insert(height, header.clone());
        while window.len() > self.window_size {
            window.pop_first();
        }
        Ok(())
    }

    pub fn remove_from(&self, from_height: Height) -> Result<(), RunnerError> {
        self.disk.remove_from(from_height)?;
        let mut window = self.window.lock().expect("headers lock poisoned");
        window.retain(|height, _| *height < from_height);
        Ok(())
    }

    pub fn last_height(&self) -> Result<Option<Height>, RunnerError> {
        {
            let window = self.window.lock().expect("headers lock poisoned");
            if let Some((height, _)) = window.last_key_value() {
                return Ok(Some(*height));
            }
        }
        self.disk.get_last_height()
    }
}
