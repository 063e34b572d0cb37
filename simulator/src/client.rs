//! Simulated exchange customers.

use kantor_common::{Currency, UserId};

/// Currencies the simulated feed quotes, base first.
pub fn simulated_currencies() -> Vec<Currency> {
    vec![
        Currency::pln(),
        Currency::usd(),
        Currency::eur(),
        Currency::gbp(),
        Currency::chf(),
    ]
}

/// A simulated customer.
#[derive(Debug, Clone)]
pub struct SimulatedClient {
    /// User identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
}

impl SimulatedClient {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            name: name.into(),
        }
    }
}

/// Client factory.
pub struct ClientFactory;

impl ClientFactory {
    /// Create N simulated clients.
    pub fn create_clients(count: usize) -> Vec<SimulatedClient> {
        let names = [
            ("anna", "Anna Kowalska"),
            ("bartek", "Bartosz Nowak"),
            ("celina", "Celina Wiśniewska"),
            ("darek", "Dariusz Wójcik"),
            ("ewa", "Ewa Kamińska"),
        ];

        (0..count)
            .map(|i| match names.get(i) {
                Some((id, name)) => SimulatedClient::new(*id, *name),
                None => SimulatedClient::new(format!("client-{}", i + 1), format!("Client {}", i + 1)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_clients() {
        let clients = ClientFactory::create_clients(7);
        assert_eq!(clients.len(), 7);
        assert_eq!(clients[0].id, UserId::new("anna"));
        assert_eq!(clients[6].id, UserId::new("client-7"));
        assert!(clients.iter().all(|c| c.id.is_valid()));
    }
}
