use state_machines::state_machine;

state_machine! {
    name: BuildMachine,
    state: BuildState,
    initial: Ready,
    states: [Ready, Staged, Prepared, Built, Published, Failed],
    events {
        stage { transition: { from: Ready, to: Staged } }
        prepare { transition: { from: Staged, to: Prepared } }
        build { transition: { from: Prepared, to: Built } }
        publish { transition: { from: Built, to: Published } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Staged, to: Failed }
            transition: { from: Prepared, to: Failed }
            transition: { from: Built, to: Failed }
            transition: { from: Published, to: Failed }
        }
    }
}

pub fn ready() -> BuildMachine<(), Ready> {
    BuildMachine::new(())
}
