use crate::config::LeaseLockConfig;
use crate::error::Result;

pub struct ConfigCommand<'a> {
    config: &'a LeaseLockConfig,
}

impl<'a> ConfigCommand<'a> {
    pub fn new(config: &'a LeaseLockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    /// Prints the effective configuration (file plus environment) as TOML.
    pub fn execute(&self) -> Result<()> {
        print!("{}", self.config.to_toml()?);
        Ok(())
    }
}
