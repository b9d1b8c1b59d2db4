use spark_relay_core::error::OperationKind;

pub(crate) const BIND: OperationKind = OperationKind {
    code: "relay.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "relay.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "relay.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "relay.transport.tcp.configure_failed",
    message: "tcp configure",
};
