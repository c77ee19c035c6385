use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Normalized, Embedded, Upserted, Checkpointed, Deferred],
    events {
        normalize { transition: { from: Ready, to: Normalized } }
        embed { transition: { from: Normalized, to: Embedded } }
        upsert { transition: { from: Embedded, to: Upserted } }
        checkpoint { transition: { from: Upserted, to: Checkpointed } }
        abort {
            transition: { from: Ready, to: Deferred }
            transition: { from: Normalized, to: Deferred }
            transition: { from: Embedded, to: Deferred }
            transition: { from: Upserted, to: Deferred }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
