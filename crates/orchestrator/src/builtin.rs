//! The fixed list of games this build can provision.

use badger_core::{ProvisionError, ProvisionerRegistry};
use provisioner_valheim::{ValheimProvisioner, GAME_NAME as VALHEIM};

/// A registry holding every provisioner compiled into this build. Fails if a
/// provisioner's configuration schema does not compile.
pub fn builtin_registry() -> Result<ProvisionerRegistry, ProvisionError> {
    let mut registry = ProvisionerRegistry::new();
    let valheim = ValheimProvisioner::new()?;
    registry.register(VALHEIM, move || Box::new(valheim.clone()));
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_serves_valheim() {
        let registry = builtin_registry().unwrap();
        let provisioner = registry.get("Valheim").expect("valheim is built in");
        assert_eq!(provisioner.name(), "valheim");
        assert_eq!(provisioner.required_ports(), vec![2456, 2457]);
        assert!(registry.get("no_such_game").is_none());
    }
}
